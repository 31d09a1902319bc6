// 📥 Programming-sheet importer
//
// read bytes → grid → StagedImport (pure) → one SQLite transaction → import_log
//
// The transaction covers unit/goal creation and every record insert, so a
// failed import leaves no trace in the budget tables. The import_log entry is
// written afterwards, for successes and failures alike.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use crate::db::{insert_import_log, ImportLogEntry};
use crate::entities::{find_or_create_goal, find_or_create_unit, OrganizationalUnit};
use crate::error::ImportError;
use crate::parser::{parse_grid, StagedImport};
use crate::programming::{insert_record, NewProgrammingRecord};
use crate::sheet::{detect_format, get_reader, SheetFormat};

/// Result of one import call, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
    pub records_created: usize,
    pub batch_id: String,
}

impl ImportOutcome {
    fn loaded(batch_id: String, records: usize, year: i32) -> Self {
        ImportOutcome {
            success: true,
            message: format!("{} records loaded for year {}", records, year),
            records_created: records,
            batch_id,
        }
    }

    fn failed(batch_id: String, err: &ImportError) -> Self {
        ImportOutcome {
            success: false,
            message: format!("Error processing file: {}", err),
            records_created: 0,
            batch_id,
        }
    }
}

/// Counts from a committed import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub records_created: usize,
    pub units_created: usize,
    pub goals_created: usize,
}

/// Import a programming sheet from disk. The format comes from the extension.
pub fn import_programming_file(conn: &mut Connection, path: &Path, year: i32) -> ImportOutcome {
    let source_name = path.display().to_string();

    let loaded = detect_format(path).and_then(|format| {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Ok((format, bytes))
    });

    match loaded {
        Ok((format, bytes)) => import_programming_bytes(conn, &bytes, format, &source_name, year),
        Err(e) => {
            let batch_id = new_batch_id();
            let err = ImportError::Read(e);
            record_outcome(conn, &batch_id, year, &source_name, None, Err(&err));
            ImportOutcome::failed(batch_id, &err)
        }
    }
}

/// Import an in-memory upload (HTTP body or test fixture)
pub fn import_programming_bytes(
    conn: &mut Connection,
    bytes: &[u8],
    format: SheetFormat,
    source_name: &str,
    year: i32,
) -> ImportOutcome {
    let batch_id = new_batch_id();
    let fingerprint = sha256_hex(bytes);

    log::info!(
        "import {}: {} ({} bytes, {}) for year {}",
        batch_id,
        source_name,
        bytes.len(),
        format,
        year
    );

    let result = get_reader(format)
        .read_bytes(bytes)
        .map_err(ImportError::Read)
        .and_then(|grid| parse_grid(&grid))
        .and_then(|staged| commit_staged(conn, &staged, year));

    match result {
        Ok(summary) => {
            log::info!(
                "import {} committed: {} records, {} new units, {} new goals",
                batch_id,
                summary.records_created,
                summary.units_created,
                summary.goals_created
            );
            record_outcome(conn, &batch_id, year, source_name, Some(fingerprint), Ok(summary.records_created));
            ImportOutcome::loaded(batch_id, summary.records_created, year)
        }
        Err(err) => {
            if err.is_input_error() {
                log::warn!("import {} rejected: {}", batch_id, err);
            } else {
                log::error!("import {} rolled back: {}", batch_id, err);
            }
            record_outcome(conn, &batch_id, year, source_name, Some(fingerprint), Err(&err));
            ImportOutcome::failed(batch_id, &err)
        }
    }
}

/// Write a staged import in one transaction.
/// Units and goals are reused by code; every staged record becomes a new row.
pub fn commit_staged(
    conn: &mut Connection,
    staged: &StagedImport,
    year: i32,
) -> Result<CommitSummary, ImportError> {
    let tx = conn.transaction()?;
    let mut summary = CommitSummary::default();

    let mut unit_ids: HashMap<&str, i64> = HashMap::new();
    for code in &staged.units {
        let (unit, created) = find_or_create_unit(&tx, code, &OrganizationalUnit::default_name(code))
            .map_err(ImportError::Storage)?;
        if created {
            summary.units_created += 1;
        }
        unit_ids.insert(code.as_str(), unit.id);
    }

    let mut goal_ids: HashMap<&str, i64> = HashMap::new();
    for goal in &staged.goals {
        let (stored, created) = find_or_create_goal(&tx, &goal.code, &goal.description)
            .map_err(ImportError::Storage)?;
        if created {
            summary.goals_created += 1;
        }
        goal_ids.insert(goal.code.as_str(), stored.id);
    }

    for staged_record in &staged.records {
        let unit_id = *unit_ids.get(staged_record.unit_code.as_str()).ok_or_else(|| {
            ImportError::Storage(anyhow::anyhow!(
                "unit {} missing from staged import",
                staged_record.unit_code
            ))
        })?;
        let goal_id = staged_record
            .goal_code
            .as_deref()
            .and_then(|code| goal_ids.get(code).copied());

        let record = NewProgrammingRecord {
            year,
            unit_id,
            goal_id,
            classifier: staged_record.classifier.clone(),
            description: staged_record.description.clone(),
            amounts: staged_record.amounts,
        };
        insert_record(&tx, &record).map_err(ImportError::Storage)?;
        summary.records_created += 1;
    }

    tx.commit()?;
    Ok(summary)
}

fn record_outcome(
    conn: &Connection,
    batch_id: &str,
    year: i32,
    source_name: &str,
    fingerprint: Option<String>,
    result: Result<usize, &ImportError>,
) {
    let entry = match result {
        Ok(records) => ImportLogEntry::new(
            batch_id,
            year,
            source_name,
            fingerprint,
            true,
            records,
            &format!("{} records loaded for year {}", records, year),
        ),
        Err(err) => ImportLogEntry::new(
            batch_id,
            year,
            source_name,
            fingerprint,
            false,
            0,
            &format!("Error processing file: {}", err),
        ),
    };

    // The budget data is already committed or rolled back at this point;
    // a failed audit write is reported but does not change the outcome.
    if let Err(e) = insert_import_log(conn, &entry) {
        log::warn!("could not write import log for {}: {:#}", batch_id, e);
    }
}

fn new_batch_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
