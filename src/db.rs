use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Units created by `seed_default_units` on an empty database
pub const DEFAULT_UNITS: [&str; 3] = ["CIDE", "DNCE", "DNCN"];

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    setup_database(&conn)?;
    log::debug!("database ready at {}", db_path.display());
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Lookup entities
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS unidades_ejecutoras (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo TEXT UNIQUE NOT NULL,
            nombre TEXT,
            activo INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS metas_presupuestales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo TEXT UNIQUE NOT NULL,
            descripcion TEXT NOT NULL,
            activo INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Budget programming (one row per data row of an imported sheet)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programacion_presupuestal (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            anio INTEGER NOT NULL,
            unidad_ejecutora_id INTEGER NOT NULL REFERENCES unidades_ejecutoras(id),
            meta_id INTEGER REFERENCES metas_presupuestales(id),
            clasificador TEXT,
            descripcion_clasificador TEXT,
            pim REAL NOT NULL DEFAULT 0,
            certificado REAL NOT NULL DEFAULT 0,
            pim_por_certificar REAL NOT NULL DEFAULT 0,
            compromiso_anual REAL NOT NULL DEFAULT 0,
            devengado_acumulado REAL NOT NULL DEFAULT 0,
            compromiso_por_devengar REAL NOT NULL DEFAULT 0,
            pim_por_devengar REAL NOT NULL DEFAULT 0,
            total_anual REAL NOT NULL DEFAULT 0,
            saldo REAL NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Procurement pipeline
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS adquisiciones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            anio INTEGER NOT NULL,
            unidad_ejecutora_id INTEGER NOT NULL REFERENCES unidades_ejecutoras(id),
            meta_id INTEGER REFERENCES metas_presupuestales(id),
            codigo_adquisicion TEXT,
            descripcion TEXT NOT NULL,
            tipo_proceso TEXT,
            estado TEXT NOT NULL,
            monto_referencial REAL NOT NULL DEFAULT 0,
            cantidad INTEGER NOT NULL DEFAULT 0,
            monto_adjudicado REAL NOT NULL DEFAULT 0,
            fecha_convocatoria TEXT,
            fecha_adjudicacion TEXT,
            proveedor TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS adquisiciones_detalle (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            adquisicion_id INTEGER UNIQUE NOT NULL REFERENCES adquisiciones(id),
            requerimientos_total INTEGER NOT NULL DEFAULT 1,
            requerimientos_adquiridos INTEGER NOT NULL DEFAULT 0,
            tipo_servicio TEXT,
            pim_asignado REAL NOT NULL DEFAULT 0,
            unidad_responsable TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS adquisiciones_proceso (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            adquisicion_id INTEGER NOT NULL REFERENCES adquisiciones(id),
            orden INTEGER NOT NULL,
            hito TEXT NOT NULL,
            tipo_flujo TEXT NOT NULL,
            responsable_area TEXT NOT NULL,
            responsable_correo TEXT,
            fecha_inicio TEXT NOT NULL,
            fecha_fin TEXT,
            dias_transcurridos INTEGER NOT NULL DEFAULT 0,
            comentarios TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Alert thresholds
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS alertas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL,
            unidad_ejecutora_id INTEGER REFERENCES unidades_ejecutoras(id),
            umbral_porcentaje REAL NOT NULL,
            activo INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Import audit log (one entry per import call, success or failure)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT UNIQUE NOT NULL,
            anio INTEGER NOT NULL,
            source_name TEXT NOT NULL,
            source_sha256 TEXT,
            success INTEGER NOT NULL,
            records_created INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programacion_anio ON programacion_presupuestal(anio)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programacion_unidad ON programacion_presupuestal(unidad_ejecutora_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_adquisiciones_codigo ON adquisiciones(codigo_adquisicion)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_proceso_adquisicion ON adquisiciones_proceso(adquisicion_id, orden)",
        [],
    )?;

    Ok(())
}

/// Remove every row from every table, children first, in one transaction.
/// The schema itself is kept.
pub fn reset_database(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    for table in [
        "adquisiciones_proceso",
        "adquisiciones_detalle",
        "adquisiciones",
        "programacion_presupuestal",
        "alertas",
        "metas_presupuestales",
        "unidades_ejecutoras",
        "import_log",
    ] {
        let removed = tx
            .execute(&format!("DELETE FROM {}", table), [])
            .with_context(|| format!("Failed to clear table {}", table))?;
        log::debug!("cleared {} rows from {}", removed, table);
    }

    tx.commit()?;
    log::info!("database reset");
    Ok(())
}

/// Insert the default organizational units when the unit table is empty.
/// Returns how many units were created.
pub fn seed_default_units(conn: &Connection) -> Result<usize> {
    let existing: i64 =
        conn.query_row("SELECT COUNT(*) FROM unidades_ejecutoras", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let now = Utc::now().to_rfc3339();
    for code in DEFAULT_UNITS {
        conn.execute(
            "INSERT INTO unidades_ejecutoras (codigo, nombre, activo, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![code, format!("Unidad {}", code), now],
        )?;
    }

    log::info!("seeded {} default units", DEFAULT_UNITS.len());
    Ok(DEFAULT_UNITS.len())
}

/// Parse a stored timestamp: RFC 3339 (written by us) or SQLite's
/// `CURRENT_TIMESTAMP` format (column default).
pub(crate) fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// IMPORT LOG
// ============================================================================

/// Audit entry for one import call
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImportLogEntry {
    pub batch_id: String,
    pub year: i32,
    pub source_name: String,
    /// SHA-256 of the uploaded bytes, when they could be read
    pub source_sha256: Option<String>,
    pub success: bool,
    pub records_created: usize,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ImportLogEntry {
    pub fn new(
        batch_id: &str,
        year: i32,
        source_name: &str,
        source_sha256: Option<String>,
        success: bool,
        records_created: usize,
        message: &str,
    ) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            year,
            source_name: source_name.to_string(),
            source_sha256,
            success,
            records_created,
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }
}

pub fn insert_import_log(conn: &Connection, entry: &ImportLogEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO import_log (
            batch_id, anio, source_name, source_sha256, success, records_created, message, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.batch_id,
            entry.year,
            entry.source_name,
            entry.source_sha256,
            entry.success,
            entry.records_created as i64,
            entry.message,
            entry.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

fn import_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportLogEntry> {
    let records: i64 = row.get(5)?;
    let created_at: String = row.get(7)?;

    Ok(ImportLogEntry {
        batch_id: row.get(0)?,
        year: row.get(1)?,
        source_name: row.get(2)?,
        source_sha256: row.get(3)?,
        success: row.get(4)?,
        records_created: records.max(0) as usize,
        message: row.get(6)?,
        created_at: parse_timestamp(Some(created_at)).unwrap_or_else(Utc::now),
    })
}

/// Most recent import log entries, newest first
pub fn import_history(conn: &Connection, limit: usize) -> Result<Vec<ImportLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, anio, source_name, source_sha256, success, records_created, message, created_at
         FROM import_log
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let entries = stmt
        .query_map(params![limit as i64], import_log_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Look up one import by its batch id
pub fn find_import(conn: &Connection, batch_id: &str) -> Result<Option<ImportLogEntry>> {
    let entry = conn
        .query_row(
            "SELECT batch_id, anio, source_name, source_sha256, success, records_created, message, created_at
             FROM import_log
             WHERE batch_id = ?1",
            params![batch_id],
            import_log_from_row,
        )
        .optional()?;

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(count(&conn, "programacion_presupuestal"), 0);
        assert_eq!(count(&conn, "import_log"), 0);
    }

    #[test]
    fn test_seed_default_units_only_once() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(seed_default_units(&conn).unwrap(), 3);
        assert_eq!(seed_default_units(&conn).unwrap(), 0);
        assert_eq!(count(&conn, "unidades_ejecutoras"), 3);

        let name: String = conn
            .query_row(
                "SELECT nombre FROM unidades_ejecutoras WHERE codigo = 'DNCE'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Unidad DNCE");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        seed_default_units(&conn).unwrap();

        conn.execute(
            "INSERT INTO programacion_presupuestal (anio, unidad_ejecutora_id, pim)
             VALUES (2025, (SELECT id FROM unidades_ejecutoras WHERE codigo = 'CIDE'), 10.0)",
            [],
        )
        .unwrap();
        insert_import_log(
            &conn,
            &ImportLogEntry::new("batch-1", 2025, "seed", None, true, 1, "ok"),
        )
        .unwrap();

        reset_database(&mut conn).unwrap();

        assert_eq!(count(&conn, "unidades_ejecutoras"), 0);
        assert_eq!(count(&conn, "programacion_presupuestal"), 0);
        assert_eq!(count(&conn, "import_log"), 0);
    }

    #[test]
    fn test_import_log_roundtrip_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = ImportLogEntry::new("batch-a", 2024, "a.xlsx", Some("ab".repeat(32)), true, 12, "12 records loaded for year 2024");
        let second = ImportLogEntry::new("batch-b", 2025, "b.csv", None, false, 0, "Error processing file: boom");
        insert_import_log(&conn, &first).unwrap();
        insert_import_log(&conn, &second).unwrap();

        let history = import_history(&conn, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].batch_id, "batch-b");
        assert!(!history[0].success);
        assert_eq!(history[1].records_created, 12);
        assert_eq!(history[1].source_sha256.as_deref().map(str::len), Some(64));

        let found = find_import(&conn, "batch-a").unwrap().unwrap();
        assert_eq!(found.year, 2024);
        assert!(find_import(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp(Some("2025-03-01T10:00:00+00:00".to_string())).is_some());
        assert!(parse_timestamp(Some("2025-03-01 10:00:00".to_string())).is_some());
        assert!(parse_timestamp(Some("yesterday".to_string())).is_none());
        assert!(parse_timestamp(None).is_none());
    }
}
