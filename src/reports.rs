// 📈 Aggregated views over the programming records

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::programming::{percentage, ProgrammingFullView, NO_GOAL_LABEL};

/// Execution band used to colour progress in the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionBand {
    OnTrack,
    AtRisk,
    Behind,
}

impl ExecutionBand {
    pub fn from_progress(progress_pct: f64) -> Self {
        if progress_pct >= 80.0 {
            ExecutionBand::OnTrack
        } else if progress_pct >= 60.0 {
            ExecutionBand::AtRisk
        } else {
            ExecutionBand::Behind
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionBand::OnTrack => "on track",
            ExecutionBand::AtRisk => "at risk",
            ExecutionBand::Behind => "behind",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_code: String,
    pub unit_name: String,
    pub records: i64,
    pub pim: f64,
    pub certificado: f64,
    pub pim_por_certificar: f64,
    pub compromiso_anual: f64,
    pub devengado: f64,
    pub compromiso_por_devengar: f64,
    /// devengado / pim * 100, one decimal
    pub progress_pct: f64,
    pub band: ExecutionBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSummary {
    pub goal_code: String,
    pub goal: String,
    pub pim: f64,
    pub certificado: f64,
    pub devengado: f64,
    pub progress_pct: f64,
}

/// Year totals per unit, largest budget first
pub fn summary_by_unit(conn: &Connection, year: i32) -> Result<Vec<UnitSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.codigo, u.nombre, COUNT(p.id),
                SUM(p.pim), SUM(p.certificado), SUM(p.pim_por_certificar),
                SUM(p.compromiso_anual), SUM(p.devengado_acumulado), SUM(p.compromiso_por_devengar)
         FROM programacion_presupuestal p
         JOIN unidades_ejecutoras u ON u.id = p.unidad_ejecutora_id
         WHERE p.anio = ?1
         GROUP BY u.id
         ORDER BY SUM(p.pim) DESC, u.codigo",
    )?;

    let summaries = stmt
        .query_map(params![year], |row| {
            let unit_code: String = row.get(0)?;
            let unit_name: Option<String> = row.get(1)?;
            let pim: f64 = row.get(3)?;
            let devengado: f64 = row.get(7)?;
            let progress_pct = percentage(devengado, pim, 1);

            Ok(UnitSummary {
                unit_name: unit_name.unwrap_or_else(|| unit_code.clone()),
                unit_code,
                records: row.get(2)?,
                pim,
                certificado: row.get(4)?,
                pim_por_certificar: row.get(5)?,
                compromiso_anual: row.get(6)?,
                devengado,
                compromiso_por_devengar: row.get(8)?,
                progress_pct,
                band: ExecutionBand::from_progress(progress_pct),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

/// Year totals per goal, top `limit` by budget. Records without a goal are grouped together.
pub fn summary_by_goal(conn: &Connection, year: i32, limit: usize) -> Result<Vec<GoalSummary>> {
    let mut stmt = conn.prepare(
        "SELECT m.codigo, m.descripcion, SUM(p.pim), SUM(p.certificado), SUM(p.devengado_acumulado)
         FROM programacion_presupuestal p
         LEFT JOIN metas_presupuestales m ON m.id = p.meta_id
         WHERE p.anio = ?1
         GROUP BY p.meta_id
         ORDER BY SUM(p.pim) DESC, m.codigo
         LIMIT ?2",
    )?;

    let summaries = stmt
        .query_map(params![year, limit as i64], |row| {
            let goal_code: Option<String> = row.get(0)?;
            let goal: Option<String> = row.get(1)?;
            let pim: f64 = row.get(2)?;
            let devengado: f64 = row.get(4)?;

            Ok(GoalSummary {
                goal_code: goal_code.unwrap_or_default(),
                goal: goal.unwrap_or_else(|| NO_GOAL_LABEL.to_string()),
                pim,
                certificado: row.get(3)?,
                devengado,
                progress_pct: percentage(devengado, pim, 1),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Año")]
    year: i32,
    #[serde(rename = "UE")]
    unit_code: &'a str,
    #[serde(rename = "Meta_Codigo")]
    goal_code: &'a str,
    #[serde(rename = "Meta")]
    goal: &'a str,
    #[serde(rename = "Clasificador")]
    classifier: &'a str,
    #[serde(rename = "Descripcion")]
    description: &'a str,
    #[serde(rename = "PIM")]
    pim: f64,
    #[serde(rename = "Certificado")]
    certificado: f64,
    #[serde(rename = "PIM_por_Certificar")]
    pim_por_certificar: f64,
    #[serde(rename = "Compromiso_Anual")]
    compromiso_anual: f64,
    #[serde(rename = "Devengado")]
    devengado: f64,
    #[serde(rename = "Compromiso_por_Devengar")]
    compromiso_por_devengar: f64,
    #[serde(rename = "PIM_por_Devengar")]
    pim_por_devengar: f64,
    #[serde(rename = "Total_Anual")]
    total_anual: f64,
    #[serde(rename = "Saldo")]
    saldo: f64,
    #[serde(rename = "Ejecucion_%")]
    execution_pct: f64,
}

/// Write the full programming view as CSV (header row included).
/// Returns the number of data rows written.
pub fn export_programming_csv<W: Write>(rows: &[ProgrammingFullView], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for row in rows {
        let a = &row.amounts;
        csv_writer
            .serialize(ExportRow {
                year: row.year,
                unit_code: &row.unit_code,
                goal_code: &row.goal_code,
                goal: &row.goal,
                classifier: &row.classifier,
                description: &row.description,
                pim: a.pim,
                certificado: a.certificado,
                pim_por_certificar: a.pim_por_certificar,
                compromiso_anual: a.compromiso_anual,
                devengado: a.devengado_acumulado,
                compromiso_por_devengar: a.compromiso_por_devengar,
                pim_por_devengar: a.pim_por_devengar,
                total_anual: a.total_anual,
                saldo: a.saldo,
                execution_pct: row.execution_pct,
            })
            .context("Failed to write CSV row")?;
    }

    csv_writer.flush().context("Failed to flush CSV output")?;
    Ok(rows.len())
}
