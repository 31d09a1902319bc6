// 📊 Budget programming records
//
// One record per data row of an imported programming sheet. Records are
// write-once: there is no update path, and they only disappear through a
// full database reset.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Goal label shown for records imported outside any goal context
pub const NO_GOAL_LABEL: &str = "Sin Meta";

/// The nine persisted amounts of a programming line
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetAmounts {
    /// PIM - modified institutional budget (planned amount)
    pub pim: f64,
    pub certificado: f64,
    pub pim_por_certificar: f64,
    pub compromiso_anual: f64,
    pub devengado_acumulado: f64,
    pub compromiso_por_devengar: f64,
    pub pim_por_devengar: f64,
    pub total_anual: f64,
    pub saldo: f64,
}

/// A programming record ready to be inserted (unit/goal already resolved)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProgrammingRecord {
    pub year: i32,
    pub unit_id: i64,
    pub goal_id: Option<i64>,
    pub classifier: Option<String>,
    pub description: String,
    pub amounts: BudgetAmounts,
}

pub fn insert_record(conn: &Connection, record: &NewProgrammingRecord) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let a = &record.amounts;

    conn.execute(
        "INSERT INTO programacion_presupuestal (
            anio, unidad_ejecutora_id, meta_id, clasificador, descripcion_clasificador,
            pim, certificado, pim_por_certificar, compromiso_anual, devengado_acumulado,
            compromiso_por_devengar, pim_por_devengar, total_anual, saldo,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
        params![
            record.year,
            record.unit_id,
            record.goal_id,
            record.classifier,
            record.description,
            a.pim,
            a.certificado,
            a.pim_por_certificar,
            a.compromiso_anual,
            a.devengado_acumulado,
            a.compromiso_por_devengar,
            a.pim_por_devengar,
            a.total_anual,
            a.saldo,
            now,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

// ============================================================================
// READ SIDE
// ============================================================================

/// Optional filters shared by the programming views
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingFilter {
    pub year: Option<i32>,
    pub unit_code: Option<String>,
    pub goal_code: Option<String>,
}

impl ProgrammingFilter {
    pub fn for_year(year: i32) -> Self {
        ProgrammingFilter {
            year: Some(year),
            ..Default::default()
        }
    }
}

/// Summary view row (the dashboard table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingView {
    pub year: i32,
    pub unit_code: String,
    pub goal_code: String,
    pub goal: String,
    pub classifier: String,
    pub description: String,
    pub pim: f64,
    pub certificado: f64,
    pub pim_por_certificar: f64,
    pub devengado: f64,
    pub total_anual: f64,
    pub saldo: f64,
    /// certificado / pim * 100, two decimals
    pub execution_pct: f64,
}

/// Full view row: every stored amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingFullView {
    pub year: i32,
    pub unit_code: String,
    pub goal_code: String,
    pub goal: String,
    pub classifier: String,
    pub description: String,
    pub amounts: BudgetAmounts,
    pub execution_pct: f64,
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Share of `part` in `total` as a percentage; 0 when total is not positive
pub fn percentage(part: f64, total: f64, decimals: i32) -> f64 {
    if total > 0.0 {
        round_to(part / total * 100.0, decimals)
    } else {
        0.0
    }
}

const FULL_VIEW_SELECT: &str = "
    SELECT p.anio, u.codigo, m.codigo, m.descripcion, p.clasificador, p.descripcion_clasificador,
           p.pim, p.certificado, p.pim_por_certificar, p.compromiso_anual, p.devengado_acumulado,
           p.compromiso_por_devengar, p.pim_por_devengar, p.total_anual, p.saldo
    FROM programacion_presupuestal p
    JOIN unidades_ejecutoras u ON u.id = p.unidad_ejecutora_id
    LEFT JOIN metas_presupuestales m ON m.id = p.meta_id
    WHERE (?1 IS NULL OR p.anio = ?1)
      AND (?2 IS NULL OR u.codigo = ?2)
      AND (?3 IS NULL OR m.codigo = ?3)
    ORDER BY p.anio, u.codigo, m.codigo, p.id";

/// Every stored field for the records matching `filter`
pub fn list_programming_full(
    conn: &Connection,
    filter: &ProgrammingFilter,
) -> Result<Vec<ProgrammingFullView>> {
    let mut stmt = conn.prepare(FULL_VIEW_SELECT)?;

    let rows = stmt
        .query_map(
            params![filter.year, filter.unit_code, filter.goal_code],
            |row| {
                let goal_code: Option<String> = row.get(2)?;
                let goal: Option<String> = row.get(3)?;
                let classifier: Option<String> = row.get(4)?;
                let description: Option<String> = row.get(5)?;

                let amounts = BudgetAmounts {
                    pim: row.get(6)?,
                    certificado: row.get(7)?,
                    pim_por_certificar: row.get(8)?,
                    compromiso_anual: row.get(9)?,
                    devengado_acumulado: row.get(10)?,
                    compromiso_por_devengar: row.get(11)?,
                    pim_por_devengar: row.get(12)?,
                    total_anual: row.get(13)?,
                    saldo: row.get(14)?,
                };

                Ok(ProgrammingFullView {
                    year: row.get(0)?,
                    unit_code: row.get(1)?,
                    goal_code: goal_code.unwrap_or_default(),
                    goal: goal.unwrap_or_else(|| NO_GOAL_LABEL.to_string()),
                    classifier: classifier.unwrap_or_default(),
                    description: description.unwrap_or_default(),
                    execution_pct: percentage(amounts.certificado, amounts.pim, 2),
                    amounts,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Dashboard view: the subset of amounts shown in the main table
pub fn list_programming(
    conn: &Connection,
    filter: &ProgrammingFilter,
) -> Result<Vec<ProgrammingView>> {
    let rows = list_programming_full(conn, filter)?
        .into_iter()
        .map(|full| ProgrammingView {
            year: full.year,
            unit_code: full.unit_code,
            goal_code: full.goal_code,
            goal: full.goal,
            classifier: full.classifier,
            description: full.description,
            pim: full.amounts.pim,
            certificado: full.amounts.certificado,
            pim_por_certificar: full.amounts.pim_por_certificar,
            devengado: full.amounts.devengado_acumulado,
            total_anual: full.amounts.total_anual,
            saldo: full.amounts.saldo,
            execution_pct: full.execution_pct,
        })
        .collect();

    Ok(rows)
}

pub fn count_records(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM programacion_presupuestal",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_records_for_year(conn: &Connection, year: i32) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM programacion_presupuestal WHERE anio = ?1",
        params![year],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Years that have programming data, newest first
pub fn available_years(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT anio FROM programacion_presupuestal ORDER BY anio DESC",
    )?;

    let years = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(years)
}
