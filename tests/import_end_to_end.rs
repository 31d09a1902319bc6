// End-to-end import tests: real workbook files on disk, real SQLite database file.

use budget_tracker::entities::{count_goals, count_units, find_goal_by_code};
use budget_tracker::{
    count_records, import_history, import_programming_file, list_programming_full,
    open_database, reset_database, seed_default_units, summary_by_unit, ProgrammingFilter,
};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A row of the sheet below the title block
enum Line<'a> {
    Label(&'a str),
    Data(&'a str, &'a [f64]),
    Raw(&'a str, &'a str),
}

fn write_workbook(dir: &TempDir, name: &str, lines: &[Line<'_>]) -> PathBuf {
    let path = dir.path().join(name);
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    sheet.write_string(0, 0, "PROGRAMACIÓN PRESUPUESTAL 2025").unwrap();
    sheet.write_string(2, 0, "Fuente: SIAF").unwrap();

    for (i, line) in lines.iter().enumerate() {
        let row = 4 + i as u32;
        match line {
            Line::Label(label) => {
                sheet.write_string(row, 0, *label).unwrap();
            }
            Line::Data(label, values) => {
                sheet.write_string(row, 0, *label).unwrap();
                for (col, value) in values.iter().enumerate() {
                    sheet.write_number(row, 1 + col as u16, *value).unwrap();
                }
            }
            Line::Raw(label, certificado) => {
                sheet.write_string(row, 0, *label).unwrap();
                sheet.write_number(row, 1, 10.0).unwrap();
                sheet.write_string(row, 2, *certificado).unwrap();
            }
        }
    }

    workbook.save(&path).unwrap();
    path
}

fn database(dir: &TempDir) -> rusqlite::Connection {
    open_database(&dir.path().join("budget.db")).unwrap()
}

fn standard_sheet(dir: &TempDir) -> PathBuf {
    write_workbook(
        dir,
        "programacion.xlsx",
        &[
            Line::Label("CIDE"),
            Line::Label("0001 - Administración"),
            Line::Data("2.3.1 Bienes", &[125000.0, 100000.0, 25000.0, 90000.0, 60000.0]),
            Line::Data("2.3.2 Servicios", &[40000.0, 10000.0, 30000.0]),
            Line::Label("Subtotal sin PIM"),
            Line::Label("DNCE"),
            Line::Label("0002 - Censos y Encuestas"),
            Line::Data("2.1.1 Personal", &[300000.0, 300000.0, 0.0, 300000.0, 250000.0]),
        ],
    )
}

#[test]
fn test_xlsx_import_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);
    let path = standard_sheet(&dir);

    let outcome = import_programming_file(&mut conn, &path, 2025);
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "3 records loaded for year 2025");

    let rows = list_programming_full(&conn, &ProgrammingFilter::for_year(2025)).unwrap();
    assert_eq!(rows.len(), 3);

    let bienes = &rows[0];
    assert_eq!(bienes.unit_code, "CIDE");
    assert_eq!(bienes.goal_code, "0001");
    assert_eq!(bienes.goal, "Administración");
    assert_eq!(bienes.classifier, "2.3.1");
    assert_eq!(bienes.description, "Bienes");
    assert_eq!(bienes.amounts.pim, 125000.0);
    assert_eq!(bienes.amounts.certificado, 100000.0);
    assert_eq!(bienes.amounts.pim_por_certificar, 25000.0);
    assert_eq!(bienes.amounts.devengado_acumulado, 60000.0);
    assert_eq!(bienes.amounts.saldo, 0.0);
    assert_eq!(bienes.execution_pct, 80.0);

    let censos = find_goal_by_code(&conn, "0002").unwrap().unwrap();
    assert_eq!(censos.description, "Censos y Encuestas");

    let summary = summary_by_unit(&conn, 2025).unwrap();
    assert_eq!(summary[0].unit_code, "DNCE");
    assert_eq!(summary[1].pim, 165000.0);
}

#[test]
fn test_reimport_does_not_duplicate_units() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);
    assert_eq!(seed_default_units(&conn).unwrap(), 3);
    let path = standard_sheet(&dir);

    assert!(import_programming_file(&mut conn, &path, 2025).success);
    assert!(import_programming_file(&mut conn, &path, 2025).success);

    // CIDE and DNCE were seeded, nothing new was created
    assert_eq!(count_units(&conn).unwrap(), 3);
    assert_eq!(count_goals(&conn).unwrap(), 2);
    assert_eq!(count_records(&conn).unwrap(), 6);
}

#[test]
fn test_malformed_cell_leaves_database_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);
    assert!(import_programming_file(&mut conn, &standard_sheet(&dir), 2025).success);

    let bad = write_workbook(
        &dir,
        "malo.xlsx",
        &[
            Line::Label("OTIN"),
            Line::Label("0007 - Nueva meta"),
            Line::Data("2.3.1 Bienes", &[10.0, 5.0]),
            Line::Raw("2.3.2 Servicios", "diez"),
        ],
    );

    let outcome = import_programming_file(&mut conn, &bad, 2025);
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Error processing file: "));
    assert!(outcome.message.contains("diez"));

    assert_eq!(count_records(&conn).unwrap(), 3);
    assert_eq!(count_units(&conn).unwrap(), 2);
    assert_eq!(count_goals(&conn).unwrap(), 2);

    let history = import_history(&conn, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].success);
    assert!(history[1].success);
}

#[test]
fn test_csv_export_of_sheet_imports_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);

    let csv_path = dir.path().join("programacion.csv");
    std::fs::write(
        &csv_path,
        "PROGRAMACION\n\nFuente: SIAF\n\nCIDE\n0001 - Administración\n2.3.1 Bienes,125000,100000,25000\n",
    )
    .unwrap();

    let outcome = import_programming_file(&mut conn, &csv_path, 2025);
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.records_created, 1);

    let rows = list_programming_full(&conn, &ProgrammingFilter::default()).unwrap();
    assert_eq!(rows[0].amounts.pim_por_certificar, 25000.0);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);

    let outcome = import_programming_file(&mut conn, Path::new("/nonexistent/plan.xlsx"), 2025);
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Error processing file: "));
    assert_eq!(count_records(&conn).unwrap(), 0);
}

#[test]
fn test_reset_clears_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = database(&dir);
    assert!(import_programming_file(&mut conn, &standard_sheet(&dir), 2025).success);

    reset_database(&mut conn).unwrap();

    assert_eq!(count_records(&conn).unwrap(), 0);
    assert_eq!(count_units(&conn).unwrap(), 0);
    assert!(import_history(&conn, 10).unwrap().is_empty());
}
