// 🎯 Budget Goal (Meta presupuestal)
//
// A programmatic objective grouping budget lines and procurements.
// Identified by its zero-padded code ("0001").

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetGoal {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

fn goal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BudgetGoal> {
    Ok(BudgetGoal {
        id: row.get(0)?,
        code: row.get(1)?,
        description: row.get(2)?,
        active: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?),
    })
}

pub fn find_goal_by_code(conn: &Connection, code: &str) -> Result<Option<BudgetGoal>> {
    let goal = conn
        .query_row(
            "SELECT id, codigo, descripcion, activo, created_at
             FROM metas_presupuestales
             WHERE codigo = ?1",
            params![code],
            goal_from_row,
        )
        .optional()?;

    Ok(goal)
}

/// Return the goal with this code, creating it with `description` if missing.
/// An existing goal keeps its stored description.
pub fn find_or_create_goal(
    conn: &Connection,
    code: &str,
    description: &str,
) -> Result<(BudgetGoal, bool)> {
    if let Some(existing) = find_goal_by_code(conn, code)? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO metas_presupuestales (codigo, descripcion, activo, created_at)
         VALUES (?1, ?2, 1, ?3)",
        params![code, description, now.to_rfc3339()],
    )?;

    log::debug!("created budget goal {} ({})", code, description);

    Ok((
        BudgetGoal {
            id: conn.last_insert_rowid(),
            code: code.to_string(),
            description: description.to_string(),
            active: true,
            created_at: Some(now),
        },
        true,
    ))
}

pub fn list_goals(conn: &Connection) -> Result<Vec<BudgetGoal>> {
    let mut stmt = conn.prepare(
        "SELECT id, codigo, descripcion, activo, created_at
         FROM metas_presupuestales
         ORDER BY codigo",
    )?;

    let goals = stmt
        .query_map([], goal_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(goals)
}

pub fn count_goals(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM metas_presupuestales", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    #[test]
    fn test_find_or_create_goal_keeps_first_description() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let (goal, created) = find_or_create_goal(&conn, "0002", "Censos y Encuestas").unwrap();
        assert!(created);
        assert_eq!(goal.description, "Censos y Encuestas");

        let (again, created) = find_or_create_goal(&conn, "0002", "Otra descripción").unwrap();
        assert!(!created);
        assert_eq!(again.id, goal.id);
        assert_eq!(again.description, "Censos y Encuestas");
        assert_eq!(count_goals(&conn).unwrap(), 1);
    }

    #[test]
    fn test_list_goals_sorted_by_code() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        find_or_create_goal(&conn, "0013", "Competitividad").unwrap();
        find_or_create_goal(&conn, "0001", "Gestión Administrativa").unwrap();

        let codes: Vec<String> = list_goals(&conn).unwrap().into_iter().map(|g| g.code).collect();
        assert_eq!(codes, vec!["0001", "0013"]);
    }
}
