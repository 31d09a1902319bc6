// 🔔 Execution alerts
//
// An alert is a threshold on execution progress (devengado / pim), either for
// one unit or for the whole year.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::parse_timestamp;
use crate::entities::find_unit_by_code;
use crate::programming::percentage;

pub const DEFAULT_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub name: String,
    pub unit_id: Option<i64>,
    /// None for a global alert
    pub unit_code: Option<String>,
    pub threshold_pct: f64,
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_global(&self) -> bool {
        self.unit_id.is_none()
    }

    pub fn scope(&self) -> &str {
        self.unit_code.as_deref().unwrap_or("ALL")
    }
}

/// Result of checking one alert against a year's programming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCheck {
    pub alert: Alert,
    pub year: i32,
    pub pim: f64,
    pub devengado: f64,
    /// devengado / pim * 100, one decimal
    pub progress_pct: f64,
    pub triggered: bool,
}

/// Create an alert. `unit_code` must name an existing unit; `None` makes it global.
pub fn create_alert(
    conn: &Connection,
    name: &str,
    unit_code: Option<&str>,
    threshold_pct: f64,
) -> Result<Alert> {
    if name.trim().is_empty() {
        bail!("Alert name cannot be empty");
    }
    if !(0.0..=100.0).contains(&threshold_pct) {
        bail!("Threshold must be between 0 and 100, got {}", threshold_pct);
    }

    let unit = match unit_code {
        Some(code) => match find_unit_by_code(conn, code)? {
            Some(unit) => Some(unit),
            None => bail!("Unknown organizational unit: {}", code),
        },
        None => None,
    };

    let now = Utc::now();
    conn.execute(
        "INSERT INTO alertas (nombre, unidad_ejecutora_id, umbral_porcentaje, activo, created_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        params![name.trim(), unit.as_ref().map(|u| u.id), threshold_pct, now.to_rfc3339()],
    )?;

    let alert = Alert {
        id: conn.last_insert_rowid(),
        name: name.trim().to_string(),
        unit_id: unit.as_ref().map(|u| u.id),
        unit_code: unit.map(|u| u.code),
        threshold_pct,
        active: true,
        created_at: Some(now),
    };

    log::info!("created alert {} ({} < {}%)", alert.id, alert.scope(), threshold_pct);
    Ok(alert)
}

pub fn list_active_alerts(conn: &Connection) -> Result<Vec<Alert>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.nombre, a.unidad_ejecutora_id, u.codigo, a.umbral_porcentaje,
                a.activo, a.created_at
         FROM alertas a
         LEFT JOIN unidades_ejecutoras u ON u.id = a.unidad_ejecutora_id
         WHERE a.activo = 1
         ORDER BY a.id",
    )?;

    let alerts = stmt
        .query_map([], |row| {
            Ok(Alert {
                id: row.get(0)?,
                name: row.get(1)?,
                unit_id: row.get(2)?,
                unit_code: row.get(3)?,
                threshold_pct: row.get(4)?,
                active: row.get(5)?,
                created_at: parse_timestamp(row.get(6)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(alerts)
}

/// Delete an alert. Returns false when no alert has that id.
pub fn delete_alert(conn: &Connection, alert_id: i64) -> Result<bool> {
    let removed = conn.execute("DELETE FROM alertas WHERE id = ?1", params![alert_id])?;
    if removed > 0 {
        log::info!("deleted alert {}", alert_id);
    }
    Ok(removed > 0)
}

/// Check every active alert against the programming of `year`.
/// A scope with no planned budget (pim = 0) never triggers.
pub fn evaluate_alerts(conn: &Connection, year: i32) -> Result<Vec<AlertCheck>> {
    let mut checks = Vec::new();

    for alert in list_active_alerts(conn)? {
        let (pim, devengado): (f64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(pim), 0), COALESCE(SUM(devengado_acumulado), 0)
             FROM programacion_presupuestal
             WHERE anio = ?1 AND (?2 IS NULL OR unidad_ejecutora_id = ?2)",
            params![year, alert.unit_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let progress_pct = percentage(devengado, pim, 1);
        let triggered = pim > 0.0 && progress_pct < alert.threshold_pct;

        if triggered {
            log::warn!(
                "alert {} triggered: {} at {}% (threshold {}%) for {}",
                alert.id,
                alert.scope(),
                progress_pct,
                alert.threshold_pct,
                year
            );
        }

        checks.push(AlertCheck {
            alert,
            year,
            pim,
            devengado,
            progress_pct,
            triggered,
        });
    }

    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::find_or_create_unit;
    use crate::programming::{insert_record, BudgetAmounts, NewProgrammingRecord};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn add_line(conn: &Connection, unit_id: i64, pim: f64, devengado: f64) {
        let record = NewProgrammingRecord {
            year: 2025,
            unit_id,
            goal_id: None,
            classifier: None,
            description: "Linea".to_string(),
            amounts: BudgetAmounts {
                pim,
                devengado_acumulado: devengado,
                ..Default::default()
            },
        };
        insert_record(conn, &record).unwrap();
    }

    #[test]
    fn test_create_list_delete() {
        let conn = open();
        find_or_create_unit(&conn, "CIDE", "Unidad CIDE").unwrap();

        let unit_alert = create_alert(&conn, "CIDE lento", Some("CIDE"), 70.0).unwrap();
        let global = create_alert(&conn, "Global", None, DEFAULT_THRESHOLD).unwrap();

        let alerts = list_active_alerts(&conn).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].unit_code.as_deref(), Some("CIDE"));
        assert!(alerts[1].is_global());

        assert!(delete_alert(&conn, unit_alert.id).unwrap());
        assert!(!delete_alert(&conn, unit_alert.id).unwrap());
        assert_eq!(list_active_alerts(&conn).unwrap()[0].id, global.id);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let conn = open();
        assert!(create_alert(&conn, "x", Some("NOPE"), 50.0).is_err());
        assert!(create_alert(&conn, "x", None, 150.0).is_err());
        assert!(create_alert(&conn, "  ", None, 50.0).is_err());
    }

    #[test]
    fn test_evaluate_by_unit_and_global() {
        let conn = open();
        let (cide, _) = find_or_create_unit(&conn, "CIDE", "Unidad CIDE").unwrap();
        let (dnce, _) = find_or_create_unit(&conn, "DNCE", "Unidad DNCE").unwrap();
        find_or_create_unit(&conn, "OTA", "Unidad OTA").unwrap();

        add_line(&conn, cide.id, 1000.0, 900.0);
        add_line(&conn, dnce.id, 1000.0, 300.0);

        create_alert(&conn, "CIDE", Some("CIDE"), 80.0).unwrap();
        create_alert(&conn, "DNCE", Some("DNCE"), 80.0).unwrap();
        create_alert(&conn, "Global", None, 60.0).unwrap();
        create_alert(&conn, "OTA sin presupuesto", Some("OTA"), 80.0).unwrap();

        let checks = evaluate_alerts(&conn, 2025).unwrap();
        assert_eq!(checks.len(), 4);

        assert_eq!(checks[0].progress_pct, 90.0);
        assert!(!checks[0].triggered);
        assert_eq!(checks[1].progress_pct, 30.0);
        assert!(checks[1].triggered);
        assert_eq!(checks[2].progress_pct, 60.0);
        assert!(!checks[2].triggered);
        assert_eq!(checks[3].pim, 0.0);
        assert!(!checks[3].triggered);

        let other_year = evaluate_alerts(&conn, 2024).unwrap();
        assert!(other_year.iter().all(|c| !c.triggered));
    }
}
