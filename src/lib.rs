// Budget Tracker - Core Library
// Programming-sheet import plus the read side used by the CLI and API server

pub mod alerts;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod importer;
pub mod parser;
pub mod procurement;
pub mod programming;
pub mod reports;
pub mod sheet;

// Re-export commonly used types
pub use alerts::{create_alert, delete_alert, evaluate_alerts, list_active_alerts, Alert, AlertCheck};
pub use config::Config;
pub use db::{
    find_import, import_history, open_database, reset_database, seed_default_units,
    setup_database, ImportLogEntry,
};
pub use entities::{BudgetGoal, OrganizationalUnit};
pub use error::ImportError;
pub use importer::{import_programming_bytes, import_programming_file, ImportOutcome};
pub use parser::{parse_grid, step, ColumnLayout, ParseState, ProgrammingRow, RowEvent, StagedImport};
pub use procurement::{
    find_by_code, insert_procurement, list_procurements, list_steps, NewProcurement,
    ProcurementRecord, ProcurementStatus, ProcurementView,
};
pub use programming::{
    available_years, count_records, list_programming, list_programming_full, BudgetAmounts,
    ProgrammingFilter, ProgrammingFullView, ProgrammingView,
};
pub use reports::{
    export_programming_csv, summary_by_goal, summary_by_unit, ExecutionBand, GoalSummary,
    UnitSummary,
};
pub use sheet::{detect_format, get_reader, Cell, CellGrid, SheetFormat, SheetReader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
