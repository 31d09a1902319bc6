// 🛒 Procurement pipeline
//
// A procurement belongs to one unit (and optionally one goal), has at most
// one detail record and an ordered list of process milestones.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::programming::{percentage, NO_GOAL_LABEL};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcurementStatus {
    #[serde(rename = "EN PROCESO")]
    InProgress,
    #[serde(rename = "CULMINADO")]
    Completed,
    #[serde(rename = "CANCELADO")]
    Cancelled,
    #[serde(rename = "HISTORICO")]
    Historical,
    #[serde(rename = "NO INICIADO")]
    NotStarted,
}

impl ProcurementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcurementStatus::InProgress => "EN PROCESO",
            ProcurementStatus::Completed => "CULMINADO",
            ProcurementStatus::Cancelled => "CANCELADO",
            ProcurementStatus::Historical => "HISTORICO",
            ProcurementStatus::NotStarted => "NO INICIADO",
        }
    }

    /// Finished one way or another
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ProcurementStatus::Completed | ProcurementStatus::Cancelled | ProcurementStatus::Historical
        )
    }
}

impl FromStr for ProcurementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "EN PROCESO" => Ok(ProcurementStatus::InProgress),
            "CULMINADO" => Ok(ProcurementStatus::Completed),
            "CANCELADO" => Ok(ProcurementStatus::Cancelled),
            "HISTORICO" | "HISTÓRICO" => Ok(ProcurementStatus::Historical),
            "NO INICIADO" => Ok(ProcurementStatus::NotStarted),
            other => anyhow::bail!("Unknown procurement status: {}", other),
        }
    }
}

impl fmt::Display for ProcurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "BIEN")]
    Goods,
    #[serde(rename = "SERVICIO")]
    Service,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Goods => "BIEN",
            ServiceType::Service => "SERVICIO",
        }
    }
}

impl FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "BIEN" => Ok(ServiceType::Goods),
            "SERVICIO" => Ok(ServiceType::Service),
            other => anyhow::bail!("Unknown service type: {}", other),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementDetail {
    pub total_requirements: i64,
    pub acquired_requirements: i64,
    pub service_type: Option<ServiceType>,
    pub assigned_pim: f64,
    pub responsible_unit: Option<String>,
}

impl Default for ProcurementDetail {
    fn default() -> Self {
        ProcurementDetail {
            total_requirements: 1,
            acquired_requirements: 0,
            service_type: None,
            assigned_pim: 0.0,
            responsible_unit: None,
        }
    }
}

impl ProcurementDetail {
    /// Acquired share of the requirements, 2 decimals
    pub fn requirements_pct(&self) -> f64 {
        percentage(
            self.acquired_requirements as f64,
            self.total_requirements as f64,
            2,
        )
    }
}

/// One milestone of the procurement process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementStep {
    pub order: i64,
    pub milestone: String,
    pub flow_type: String,
    pub responsible_area: String,
    pub responsible_email: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub elapsed_days: i64,
    pub comments: Option<String>,
}

impl ProcurementStep {
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}

/// A procurement to be inserted (unit/goal already resolved)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProcurement {
    pub year: i32,
    pub unit_id: i64,
    pub goal_id: Option<i64>,
    pub code: Option<String>,
    pub description: String,
    pub process_type: Option<String>,
    pub status: ProcurementStatus,
    pub reference_amount: f64,
    pub quantity: i64,
    pub awarded_amount: f64,
    pub call_date: Option<NaiveDate>,
    pub award_date: Option<NaiveDate>,
    pub supplier: Option<String>,
    pub detail: Option<ProcurementDetail>,
    pub steps: Vec<ProcurementStep>,
}

/// Stored procurement row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procurement {
    pub id: i64,
    pub year: i32,
    pub unit_id: i64,
    pub goal_id: Option<i64>,
    pub code: Option<String>,
    pub description: String,
    pub process_type: Option<String>,
    pub status: ProcurementStatus,
    pub reference_amount: f64,
    pub quantity: i64,
    pub awarded_amount: f64,
    pub call_date: Option<NaiveDate>,
    pub award_date: Option<NaiveDate>,
    pub supplier: Option<String>,
}

impl Procurement {
    /// Awarded share of the reference amount, 2 decimals
    pub fn award_pct(&self) -> f64 {
        percentage(self.awarded_amount, self.reference_amount, 2)
    }
}

/// Procurement with its detail and milestones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementRecord {
    pub procurement: Procurement,
    pub detail: Option<ProcurementDetail>,
    pub steps: Vec<ProcurementStep>,
}

/// Row of the procurement table view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcurementView {
    pub year: i32,
    pub unit_code: String,
    pub unit_name: String,
    pub goal_code: String,
    pub goal: String,
    pub code: String,
    pub quantity: i64,
    pub description: String,
    pub process_type: String,
    pub status: ProcurementStatus,
    pub reference_amount: f64,
    pub awarded_amount: f64,
    pub supplier: String,
    pub call_date: Option<NaiveDate>,
    pub award_date: Option<NaiveDate>,
    pub award_pct: f64,
    pub service_type: String,
}

// ============================================================================
// WRITE
// ============================================================================

/// Insert a procurement with its detail and steps in one transaction
pub fn insert_procurement(conn: &mut Connection, new: &NewProcurement) -> Result<i64> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();

    tx.execute(
        "INSERT INTO adquisiciones (
            anio, unidad_ejecutora_id, meta_id, codigo_adquisicion, descripcion, tipo_proceso,
            estado, monto_referencial, cantidad, monto_adjudicado, fecha_convocatoria,
            fecha_adjudicacion, proveedor, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            new.year,
            new.unit_id,
            new.goal_id,
            new.code,
            new.description,
            new.process_type,
            new.status.as_str(),
            new.reference_amount,
            new.quantity,
            new.awarded_amount,
            new.call_date.map(format_date),
            new.award_date.map(format_date),
            new.supplier,
            now,
        ],
    )
    .context("Failed to insert procurement")?;

    let procurement_id = tx.last_insert_rowid();

    if let Some(detail) = &new.detail {
        tx.execute(
            "INSERT INTO adquisiciones_detalle (
                adquisicion_id, requerimientos_total, requerimientos_adquiridos,
                tipo_servicio, pim_asignado, unidad_responsable, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                procurement_id,
                detail.total_requirements,
                detail.acquired_requirements,
                detail.service_type.map(|s| s.as_str()),
                detail.assigned_pim,
                detail.responsible_unit,
                now,
            ],
        )?;
    }

    for step in &new.steps {
        tx.execute(
            "INSERT INTO adquisiciones_proceso (
                adquisicion_id, orden, hito, tipo_flujo, responsable_area, responsable_correo,
                fecha_inicio, fecha_fin, dias_transcurridos, comentarios, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                procurement_id,
                step.order,
                step.milestone,
                step.flow_type,
                step.responsible_area,
                step.responsible_email,
                format_date(step.start_date),
                step.end_date.map(format_date),
                step.elapsed_days,
                step.comments,
                now,
            ],
        )?;
    }

    tx.commit()?;
    log::debug!(
        "inserted procurement {} with {} steps",
        new.code.as_deref().unwrap_or("(no code)"),
        new.steps.len()
    );

    Ok(procurement_id)
}

// ============================================================================
// READ
// ============================================================================

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parsed_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn procurement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Procurement> {
    Ok(Procurement {
        id: row.get(0)?,
        year: row.get(1)?,
        unit_id: row.get(2)?,
        goal_id: row.get(3)?,
        code: row.get(4)?,
        description: row.get(5)?,
        process_type: row.get(6)?,
        status: parsed_column(row, 7)?,
        reference_amount: row.get(8)?,
        quantity: row.get(9)?,
        awarded_amount: row.get(10)?,
        call_date: date_column(row, 11)?,
        award_date: date_column(row, 12)?,
        supplier: row.get(13)?,
    })
}

/// Table view of all procurements, optionally for one year
pub fn list_procurements(conn: &Connection, year: Option<i32>) -> Result<Vec<ProcurementView>> {
    let mut stmt = conn.prepare(
        "SELECT a.anio, u.codigo, u.nombre, m.codigo, m.descripcion, a.codigo_adquisicion,
                a.cantidad, a.descripcion, a.tipo_proceso, a.estado, a.monto_referencial,
                a.monto_adjudicado, a.proveedor, a.fecha_convocatoria, a.fecha_adjudicacion,
                d.tipo_servicio
         FROM adquisiciones a
         JOIN unidades_ejecutoras u ON u.id = a.unidad_ejecutora_id
         LEFT JOIN metas_presupuestales m ON m.id = a.meta_id
         LEFT JOIN adquisiciones_detalle d ON d.adquisicion_id = a.id
         WHERE (?1 IS NULL OR a.anio = ?1)
         ORDER BY a.anio, u.codigo, a.id",
    )?;

    let views = stmt
        .query_map(params![year], |row| {
            let unit_code: String = row.get(1)?;
            let unit_name: Option<String> = row.get(2)?;
            let goal_code: Option<String> = row.get(3)?;
            let goal: Option<String> = row.get(4)?;
            let code: Option<String> = row.get(5)?;
            let process_type: Option<String> = row.get(8)?;
            let supplier: Option<String> = row.get(12)?;
            let service_type: Option<String> = row.get(15)?;
            let reference_amount: f64 = row.get(10)?;
            let awarded_amount: f64 = row.get(11)?;

            Ok(ProcurementView {
                year: row.get(0)?,
                unit_name: unit_name.unwrap_or_else(|| unit_code.clone()),
                unit_code,
                goal_code: goal_code.unwrap_or_default(),
                goal: goal.unwrap_or_else(|| NO_GOAL_LABEL.to_string()),
                code: code.unwrap_or_default(),
                quantity: row.get(6)?,
                description: row.get(7)?,
                process_type: process_type.unwrap_or_else(|| "No especificado".to_string()),
                status: parsed_column(row, 9)?,
                reference_amount,
                awarded_amount,
                supplier: supplier.unwrap_or_else(|| "Sin proveedor".to_string()),
                call_date: date_column(row, 13)?,
                award_date: date_column(row, 14)?,
                award_pct: percentage(awarded_amount, reference_amount, 2),
                service_type: service_type.unwrap_or_else(|| "No especificado".to_string()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(views)
}

/// Milestones of one procurement, in process order
pub fn list_steps(conn: &Connection, procurement_id: i64) -> Result<Vec<ProcurementStep>> {
    let mut stmt = conn.prepare(
        "SELECT orden, hito, tipo_flujo, responsable_area, responsable_correo,
                fecha_inicio, fecha_fin, dias_transcurridos, comentarios
         FROM adquisiciones_proceso
         WHERE adquisicion_id = ?1
         ORDER BY orden, id",
    )?;

    let steps = stmt
        .query_map(params![procurement_id], |row| {
            let start: String = row.get(5)?;
            let start_date = NaiveDate::parse_from_str(&start, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

            Ok(ProcurementStep {
                order: row.get(0)?,
                milestone: row.get(1)?,
                flow_type: row.get(2)?,
                responsible_area: row.get(3)?,
                responsible_email: row.get(4)?,
                start_date,
                end_date: date_column(row, 6)?,
                elapsed_days: row.get(7)?,
                comments: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(steps)
}

fn find_detail(conn: &Connection, procurement_id: i64) -> Result<Option<ProcurementDetail>> {
    let detail = conn
        .query_row(
            "SELECT requerimientos_total, requerimientos_adquiridos, tipo_servicio,
                    pim_asignado, unidad_responsable
             FROM adquisiciones_detalle
             WHERE adquisicion_id = ?1",
            params![procurement_id],
            |row| {
                let service_type: Option<String> = row.get(2)?;
                let service_type = service_type
                    .map(|s| {
                        s.parse::<ServiceType>().map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
                        })
                    })
                    .transpose()?;

                Ok(ProcurementDetail {
                    total_requirements: row.get(0)?,
                    acquired_requirements: row.get(1)?,
                    service_type,
                    assigned_pim: row.get(3)?,
                    responsible_unit: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(detail)
}

/// Full lookup by procurement code: record, detail and ordered steps.
/// When several procurements share a code, the first one inserted wins.
pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<ProcurementRecord>> {
    let procurement = conn
        .query_row(
            "SELECT id, anio, unidad_ejecutora_id, meta_id, codigo_adquisicion, descripcion,
                    tipo_proceso, estado, monto_referencial, cantidad, monto_adjudicado,
                    fecha_convocatoria, fecha_adjudicacion, proveedor
             FROM adquisiciones
             WHERE codigo_adquisicion = ?1
             ORDER BY id
             LIMIT 1",
            params![code],
            procurement_from_row,
        )
        .optional()?;

    let procurement = match procurement {
        Some(p) => p,
        None => return Ok(None),
    };

    let detail = find_detail(conn, procurement.id)?;
    let steps = list_steps(conn, procurement.id)?;

    Ok(Some(ProcurementRecord {
        procurement,
        detail,
        steps,
    }))
}

pub fn count_procurements(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM adquisiciones", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::{find_or_create_goal, find_or_create_unit};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn step(order: i64, milestone: &str, end: Option<NaiveDate>) -> ProcurementStep {
        ProcurementStep {
            order,
            milestone: milestone.to_string(),
            flow_type: "REQUERIMIENTO".to_string(),
            responsible_area: "OTA".to_string(),
            responsible_email: None,
            start_date: date(2025, 3, order as u32),
            end_date: end,
            elapsed_days: 2,
            comments: None,
        }
    }

    fn sample(unit_id: i64, goal_id: Option<i64>) -> NewProcurement {
        NewProcurement {
            year: 2025,
            unit_id,
            goal_id,
            code: Some("ADQ-2025-001".to_string()),
            description: "Adquisición de equipos de cómputo".to_string(),
            process_type: Some("Licitación Pública".to_string()),
            status: ProcurementStatus::InProgress,
            reference_amount: 200000.0,
            quantity: 40,
            awarded_amount: 150000.0,
            call_date: Some(date(2025, 2, 10)),
            award_date: None,
            supplier: None,
            detail: Some(ProcurementDetail {
                acquired_requirements: 1,
                total_requirements: 3,
                service_type: Some(ServiceType::Goods),
                assigned_pim: 210000.0,
                responsible_unit: Some("OTIN".to_string()),
            }),
            // Inserted out of order on purpose
            steps: vec![
                step(2, "Convocatoria", None),
                step(1, "Requerimiento", Some(date(2025, 3, 3))),
            ],
        }
    }

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_status_round_trip_through_text() {
        assert_eq!("en proceso".parse::<ProcurementStatus>().unwrap(), ProcurementStatus::InProgress);
        assert_eq!("NO_INICIADO".parse::<ProcurementStatus>().unwrap(), ProcurementStatus::NotStarted);
        assert!("Adjudicado".parse::<ProcurementStatus>().is_err());
        assert!(ProcurementStatus::Historical.is_closed());
        assert!(!ProcurementStatus::InProgress.is_closed());
    }

    #[test]
    fn test_insert_and_find_by_code() {
        let mut conn = open();
        let (unit, _) = find_or_create_unit(&conn, "CIDE", "Unidad CIDE").unwrap();
        let (goal, _) = find_or_create_goal(&conn, "0001", "Administración").unwrap();

        insert_procurement(&mut conn, &sample(unit.id, Some(goal.id))).unwrap();

        let record = find_by_code(&conn, "ADQ-2025-001").unwrap().unwrap();
        assert_eq!(record.procurement.status, ProcurementStatus::InProgress);
        assert_eq!(record.procurement.call_date, Some(date(2025, 2, 10)));
        assert_eq!(record.procurement.award_pct(), 75.0);

        let detail = record.detail.unwrap();
        assert_eq!(detail.service_type, Some(ServiceType::Goods));
        assert_eq!(detail.requirements_pct(), 33.33);

        let milestones: Vec<&str> = record.steps.iter().map(|s| s.milestone.as_str()).collect();
        assert_eq!(milestones, vec!["Requerimiento", "Convocatoria"]);
        assert!(record.steps[1].is_open());

        assert!(find_by_code(&conn, "ADQ-0000").unwrap().is_none());
    }

    #[test]
    fn test_list_view_defaults() {
        let mut conn = open();
        let (unit, _) = find_or_create_unit(&conn, "DNCE", "Unidad DNCE").unwrap();

        let mut bare = sample(unit.id, None);
        bare.code = None;
        bare.process_type = None;
        bare.detail = None;
        bare.steps.clear();
        bare.reference_amount = 0.0;
        insert_procurement(&mut conn, &bare).unwrap();

        let mut older = sample(unit.id, None);
        older.year = 2024;
        insert_procurement(&mut conn, &older).unwrap();

        assert_eq!(count_procurements(&conn).unwrap(), 2);

        let views = list_procurements(&conn, Some(2025)).unwrap();
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.goal, NO_GOAL_LABEL);
        assert_eq!(view.code, "");
        assert_eq!(view.process_type, "No especificado");
        assert_eq!(view.supplier, "Sin proveedor");
        assert_eq!(view.service_type, "No especificado");
        assert_eq!(view.award_pct, 0.0);

        assert_eq!(list_procurements(&conn, None).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_insert_leaves_nothing_behind() {
        let mut conn = open();
        // unit 99 does not exist: the foreign key rejects the insert
        let result = insert_procurement(&mut conn, &sample(99, None));

        assert!(result.is_err());
        assert_eq!(count_procurements(&conn).unwrap(), 0);
    }
}
