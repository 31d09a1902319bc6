// 🏢 Organizational Unit (UE / DDNNTT)
//
// An executing administrative unit holding its own budget lines.
// The code is the identity: lookups are by code and creation is idempotent.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub id: i64,

    /// Short uppercase code, e.g. "CIDE"
    pub code: String,

    /// Display name
    pub name: Option<String>,

    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl OrganizationalUnit {
    /// Name used when a unit is created on the fly during an import
    pub fn default_name(code: &str) -> String {
        format!("Unidad {}", code)
    }

    /// Name for display: the stored name, or the code when there is none
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }
}

fn unit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrganizationalUnit> {
    Ok(OrganizationalUnit {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        active: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?),
    })
}

pub fn find_unit_by_code(conn: &Connection, code: &str) -> Result<Option<OrganizationalUnit>> {
    let unit = conn
        .query_row(
            "SELECT id, codigo, nombre, activo, created_at
             FROM unidades_ejecutoras
             WHERE codigo = ?1",
            params![code],
            unit_from_row,
        )
        .optional()?;

    Ok(unit)
}

/// Return the unit with this code, creating it if it does not exist yet.
/// The boolean is true when a new row was inserted.
///
/// Takes a plain `&Connection` so it can run inside an open transaction.
pub fn find_or_create_unit(
    conn: &Connection,
    code: &str,
    name: &str,
) -> Result<(OrganizationalUnit, bool)> {
    if let Some(existing) = find_unit_by_code(conn, code)? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO unidades_ejecutoras (codigo, nombre, activo, created_at)
         VALUES (?1, ?2, 1, ?3)",
        params![code, name, now.to_rfc3339()],
    )?;

    log::debug!("created organizational unit {}", code);

    Ok((
        OrganizationalUnit {
            id: conn.last_insert_rowid(),
            code: code.to_string(),
            name: Some(name.to_string()),
            active: true,
            created_at: Some(now),
        },
        true,
    ))
}

/// All units ordered by code
pub fn list_units(conn: &Connection, active_only: bool) -> Result<Vec<OrganizationalUnit>> {
    let mut stmt = conn.prepare(
        "SELECT id, codigo, nombre, activo, created_at
         FROM unidades_ejecutoras
         WHERE (?1 = 0 OR activo = 1)
         ORDER BY codigo",
    )?;

    let units = stmt
        .query_map(params![active_only], unit_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(units)
}

pub fn count_units(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM unidades_ejecutoras", [], |row| row.get(0))?;
    Ok(count)
}
