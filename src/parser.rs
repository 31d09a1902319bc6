// 🧾 Programming-sheet parser
//
// Walks the cell grid of an annual programming sheet and rebuilds the
// unit → goal → classifier hierarchy from the flat rows.
//
// Sheet shape:
//   rows 1-4   title block (ignored)
//   row 5+     label in column A, 13 numeric columns B..N
//
// Each row is one of: unit marker ("CIDE"), goal marker ("0002 - Censos"),
// or a data row with a PIM value. The current unit/goal context is explicit
// state threaded through `step`, so the whole parse is a `try_fold` and does
// not touch the database. The importer persists the result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::ImportError;
use crate::programming::BudgetAmounts;
use crate::sheet::Cell;

/// Rows of title block above the table
pub const TITLE_ROWS: usize = 4;

/// Label of the column header row (may repeat inside the sheet)
pub const HEADER_LABEL: &str = "ddnntt / meta / clasificador";

// ============================================================================
// COLUMNS
// ============================================================================

/// Columns of the programming sheet, in template order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Label,
    Pim,
    Certificado,
    PimPorCertificar,
    CompromisoAnual,
    DevengadoAcumulado,
    CompromisoAnualPorDevengar,
    PimPorDevengar,
    NovProgramacion,
    NovEjecucion,
    NovPendiente,
    DicProg,
    TotalAnual,
    Saldo,
}

impl Column {
    pub const COUNT: usize = 14;

    pub const ALL: [Column; Column::COUNT] = [
        Column::Label,
        Column::Pim,
        Column::Certificado,
        Column::PimPorCertificar,
        Column::CompromisoAnual,
        Column::DevengadoAcumulado,
        Column::CompromisoAnualPorDevengar,
        Column::PimPorDevengar,
        Column::NovProgramacion,
        Column::NovEjecucion,
        Column::NovPendiente,
        Column::DicProg,
        Column::TotalAnual,
        Column::Saldo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Label => "DESCRIPCION",
            Column::Pim => "PIM",
            Column::Certificado => "CERTIFICADO",
            Column::PimPorCertificar => "PIM_POR_CERTIFICAR",
            Column::CompromisoAnual => "COMPROMISO_ANUAL",
            Column::DevengadoAcumulado => "DEVENGADO_ACUMULADO",
            Column::CompromisoAnualPorDevengar => "COMPROMISO_ANUAL_POR_DEVENGAR",
            Column::PimPorDevengar => "PIM_POR_DEVENGAR",
            Column::NovProgramacion => "NOV_PROGRAMACION",
            Column::NovEjecucion => "NOV_EJECUCION",
            Column::NovPendiente => "NOV_PENDIENTE",
            Column::DicProg => "DIC_PROG",
            Column::TotalAnual => "TOTAL_ANUAL",
            Column::Saldo => "SALDO",
        }
    }

    /// Recognize a header cell ("PIM por certificar", "Devengado", ...)
    pub fn from_header(header: &str) -> Option<Column> {
        let normalized = normalize_header(header);

        if let Some(column) = Column::ALL.iter().find(|c| c.name() == normalized) {
            return Some(*column);
        }

        match normalized.as_str() {
            "DESCRIPCION_CLASIFICADOR" | "DDNNTT_META_CLASIFICADOR" => Some(Column::Label),
            "DEVENGADO" => Some(Column::DevengadoAcumulado),
            "COMPROMISO_POR_DEVENGAR" => Some(Column::CompromisoAnualPorDevengar),
            "NOV_PROG" => Some(Column::NovProgramacion),
            "DIC_PROGRAMACION" => Some(Column::DicProg),
            _ => None,
        }
    }

    /// Monthly breakdown columns are read but never stored
    pub fn is_persisted(self) -> bool {
        !matches!(
            self,
            Column::NovProgramacion | Column::NovEjecucion | Column::NovPendiente | Column::DicProg
        )
    }
}

fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for ch in header.trim().chars() {
        let ch = match ch {
            'á' | 'Á' => 'A',
            'é' | 'É' => 'E',
            'í' | 'Í' => 'I',
            'ó' | 'Ó' => 'O',
            'ú' | 'Ú' => 'U',
            'ñ' | 'Ñ' => 'N',
            other => other.to_ascii_uppercase(),
        };
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Where each column lives in the sheet. Checked once before any row is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    positions: [usize; Column::COUNT],
}

impl ColumnLayout {
    /// Template order: column i holds `Column::ALL[i]`
    pub fn standard() -> Self {
        let mut positions = [0; Column::COUNT];
        for (i, slot) in positions.iter_mut().enumerate() {
            *slot = i;
        }
        ColumnLayout { positions }
    }

    pub fn position(&self, column: Column) -> usize {
        self.positions[column as usize]
    }

    /// Build the layout from a header row. Recognized names may appear in any
    /// order; a header with unrecognized or missing names falls back to template
    /// order. Trailing blank header cells are trimmed by the readers.
    pub fn from_header_row(row_number: usize, cells: &[Cell]) -> Result<Self, ImportError> {
        if cells.len() > Column::COUNT {
            return Err(ImportError::UnexpectedColumnLayout {
                row: row_number,
                expected: Column::COUNT,
                found: cells.len(),
            });
        }

        let mut positions = [usize::MAX; Column::COUNT];
        positions[Column::Label as usize] = 0;

        for (pos, cell) in cells.iter().enumerate().skip(1) {
            let header = cell.to_text();
            match Column::from_header(&header) {
                Some(Column::Label) | None => return Ok(Self::standard()),
                Some(column) => {
                    if positions[column as usize] != usize::MAX {
                        return Err(ImportError::DuplicateHeader {
                            column: pos + 1,
                            header,
                        });
                    }
                    positions[column as usize] = pos;
                }
            }
        }

        if positions.contains(&usize::MAX) {
            return Ok(Self::standard());
        }
        Ok(ColumnLayout { positions })
    }

    /// Validate the grid below the title block and pick its layout.
    /// Fails fast when any row is wider than the template.
    pub fn detect(grid: &[Vec<Cell>]) -> Result<Self, ImportError> {
        let mut layout = None;

        for (index, cells) in grid.iter().enumerate().skip(TITLE_ROWS) {
            let row_number = index + 1;

            if cells.len() > Column::COUNT {
                return Err(ImportError::UnexpectedColumnLayout {
                    row: row_number,
                    expected: Column::COUNT,
                    found: cells.len(),
                });
            }

            let label = cells.first().map(Cell::to_text).unwrap_or_default();
            if layout.is_none() && is_header_label(&label) {
                layout = Some(Self::from_header_row(row_number, cells)?);
            }
        }

        Ok(layout.unwrap_or_else(Self::standard))
    }

    /// Map raw cells to a typed row
    pub fn typed_row(&self, row_number: usize, cells: &[Cell]) -> ProgrammingRow {
        let values = Column::ALL
            .iter()
            .map(|column| {
                cells
                    .get(self.position(*column))
                    .cloned()
                    .unwrap_or(Cell::Empty)
            })
            .collect();

        ProgrammingRow { row_number, values }
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// TYPED ROW
// ============================================================================

/// One sheet row with its cells addressed by `Column`
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammingRow {
    /// 1-based sheet row number (for error messages)
    pub row_number: usize,
    values: Vec<Cell>,
}

impl ProgrammingRow {
    /// Row in template column order (missing trailing cells are blank)
    pub fn from_cells(row_number: usize, cells: &[Cell]) -> Self {
        ColumnLayout::standard().typed_row(row_number, cells)
    }

    pub fn get(&self, column: Column) -> &Cell {
        &self.values[column as usize]
    }

    /// Trimmed label text
    pub fn label(&self) -> String {
        self.get(Column::Label).to_text()
    }

    /// Numeric value of a cell: `None` when missing, error when not a number
    pub fn number(&self, column: Column) -> Result<Option<f64>, ImportError> {
        match self.get(column) {
            Cell::Empty => Ok(None),
            Cell::Number(n) => Ok(Some(*n)),
            Cell::Text(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ImportError::MalformedCell {
                        row: self.row_number,
                        column: column.name(),
                        value: raw.clone(),
                    })
            }
        }
    }

    /// Numeric value, blank cells count as zero
    pub fn amount(&self, column: Column) -> Result<f64, ImportError> {
        Ok(self.number(column)?.unwrap_or(0.0))
    }

    pub fn has_pim(&self) -> bool {
        !self.get(Column::Pim).to_text().is_empty()
    }

    /// The nine persisted amounts
    pub fn amounts(&self) -> Result<BudgetAmounts, ImportError> {
        Ok(BudgetAmounts {
            pim: self.amount(Column::Pim)?,
            certificado: self.amount(Column::Certificado)?,
            pim_por_certificar: self.amount(Column::PimPorCertificar)?,
            compromiso_anual: self.amount(Column::CompromisoAnual)?,
            devengado_acumulado: self.amount(Column::DevengadoAcumulado)?,
            compromiso_por_devengar: self.amount(Column::CompromisoAnualPorDevengar)?,
            pim_por_devengar: self.amount(Column::PimPorDevengar)?,
            total_anual: self.amount(Column::TotalAnual)?,
            saldo: self.amount(Column::Saldo)?,
        })
    }
}

// ============================================================================
// ROW CLASSIFICATION
// ============================================================================

fn unit_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{3,5}$").expect("unit marker pattern"))
}

fn classifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\s*\d+\.").expect("classifier pattern"))
}

pub fn is_header_label(label: &str) -> bool {
    label.trim().to_lowercase() == HEADER_LABEL
}

/// Short all-caps unit code, e.g. "CIDE"
pub fn is_unit_marker(label: &str) -> bool {
    unit_marker_re().is_match(label.trim())
}

/// Split "0002 - Censos y Encuestas" into ("0002", "Censos y Encuestas").
/// An empty description falls back to the code.
pub fn split_goal_marker(label: &str) -> Option<(String, String)> {
    let label = label.trim();
    if !label.starts_with('0') {
        return None;
    }

    let (code, rest) = label.split_once(" - ")?;

    let code = code.trim().to_string();
    let description = match rest.trim() {
        "" => code.clone(),
        text => text.to_string(),
    };
    Some((code, description))
}

/// Split "2.3.1 Compra de Bienes" into (Some("2.3.1"), "Compra de Bienes").
/// Labels without a dotted classifier prefix keep the whole text as description.
pub fn split_classifier(label: &str) -> (Option<String>, String) {
    let label = label.trim();
    if !classifier_re().is_match(label) {
        return (None, label.to_string());
    }

    match label.split_once(char::is_whitespace) {
        Some((code, rest)) if !rest.trim().is_empty() => {
            (Some(code.trim().to_string()), rest.trim().to_string())
        }
        Some((code, _)) => (Some(code.trim().to_string()), label.to_string()),
        None => (Some(label.to_string()), label.to_string()),
    }
}

/// What a row is, judged from its label and PIM cell only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowKind {
    Blank,
    Header,
    UnitMarker { code: String },
    GoalMarker { code: String, description: String },
    /// Not a marker and no PIM value
    MissingPim,
    Data {
        classifier: Option<String>,
        description: String,
    },
}

/// Classify a row. Marker checks come before the PIM check because marker
/// rows never carry a PIM value; a marker label wins over any numeric cells.
pub fn classify(row: &ProgrammingRow) -> RowKind {
    let label = row.label();

    if label.is_empty() {
        return RowKind::Blank;
    }
    if is_header_label(&label) {
        return RowKind::Header;
    }
    if is_unit_marker(&label) {
        return RowKind::UnitMarker { code: label };
    }
    if let Some((code, description)) = split_goal_marker(&label) {
        return RowKind::GoalMarker { code, description };
    }
    if !row.has_pim() {
        return RowKind::MissingPim;
    }

    let (classifier, description) = split_classifier(&label);
    RowKind::Data {
        classifier,
        description,
    }
}

// ============================================================================
// FOLD
// ============================================================================

/// Context carried from row to row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseState {
    pub unit: Option<String>,
    pub goal: Option<String>,
}

/// A data row resolved against the context it appeared in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub row_number: usize,
    pub unit_code: String,
    pub goal_code: Option<String>,
    pub classifier: Option<String>,
    pub description: String,
    pub amounts: BudgetAmounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Blank,
    Header,
    MissingPim,
    /// Data row seen before any unit marker
    NoUnitContext,
}

/// Effect of one row on the import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowEvent {
    Unit { code: String },
    Goal { code: String, description: String },
    Record(StagedRecord),
    Skipped(SkipReason),
}

/// Process one row: returns the next context and what the row contributes.
/// Numeric cells are only read for data rows that have a unit context.
pub fn step(state: ParseState, row: &ProgrammingRow) -> Result<(ParseState, RowEvent), ImportError> {
    match classify(row) {
        RowKind::Blank => Ok((state, RowEvent::Skipped(SkipReason::Blank))),
        RowKind::Header => Ok((state, RowEvent::Skipped(SkipReason::Header))),
        RowKind::MissingPim => Ok((state, RowEvent::Skipped(SkipReason::MissingPim))),
        RowKind::UnitMarker { code } => {
            let next = ParseState {
                unit: Some(code.clone()),
                goal: None,
            };
            Ok((next, RowEvent::Unit { code }))
        }
        RowKind::GoalMarker { code, description } => {
            let next = ParseState {
                goal: Some(code.clone()),
                ..state
            };
            Ok((next, RowEvent::Goal { code, description }))
        }
        RowKind::Data {
            classifier,
            description,
        } => {
            let Some(unit_code) = state.unit.clone() else {
                return Ok((state, RowEvent::Skipped(SkipReason::NoUnitContext)));
            };

            let record = StagedRecord {
                row_number: row.row_number,
                unit_code,
                goal_code: state.goal.clone(),
                classifier,
                description,
                amounts: row.amounts()?,
            };
            Ok((state, RowEvent::Record(record)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedGoal {
    pub code: String,
    pub description: String,
}

/// Everything an import will write, before it touches the database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedImport {
    /// Distinct unit codes in order of first appearance
    pub units: Vec<String>,
    /// Distinct goals; the first description seen for a code wins
    pub goals: Vec<StagedGoal>,
    pub records: Vec<StagedRecord>,
    pub skipped_rows: usize,
}

impl StagedImport {
    fn absorb(&mut self, event: RowEvent) {
        match event {
            RowEvent::Unit { code } => {
                if !self.units.contains(&code) {
                    self.units.push(code);
                }
            }
            RowEvent::Goal { code, description } => {
                if !self.goals.iter().any(|g| g.code == code) {
                    self.goals.push(StagedGoal { code, description });
                }
            }
            RowEvent::Record(record) => self.records.push(record),
            RowEvent::Skipped(_) => self.skipped_rows += 1,
        }
    }
}

/// Parse a whole sheet grid. Pure: no I/O, no database.
pub fn parse_grid(grid: &[Vec<Cell>]) -> Result<StagedImport, ImportError> {
    let layout = ColumnLayout::detect(grid)?;

    let (_, staged) = grid
        .iter()
        .enumerate()
        .skip(TITLE_ROWS)
        .map(|(index, cells)| layout.typed_row(index + 1, cells))
        .try_fold(
            (ParseState::default(), StagedImport::default()),
            |(state, mut staged), row| {
                let (next, event) = step(state, &row)?;
                staged.absorb(event);
                Ok::<_, ImportError>((next, staged))
            },
        )?;

    log::debug!(
        "parsed sheet: {} units, {} goals, {} records, {} skipped rows",
        staged.units.len(),
        staged.goals.len(),
        staged.records.len(),
        staged.skipped_rows
    );

    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn num(n: f64) -> Cell {
        Cell::Number(n)
    }

    fn title_block() -> Vec<Vec<Cell>> {
        vec![
            vec![text("PROGRAMACIÓN ANUAL 2025")],
            vec![],
            vec![text("Fuente: SIAF")],
            vec![],
        ]
    }

    fn data_row(label: &str, pim: f64, certificado: f64) -> Vec<Cell> {
        vec![text(label), num(pim), num(certificado), num(pim - certificado)]
    }

    #[test]
    fn test_unit_marker_pattern() {
        assert!(is_unit_marker("CIDE"));
        assert!(is_unit_marker("OTA"));
        assert!(is_unit_marker("DTDIS"));
        assert!(is_unit_marker("  DNCE  "));
        assert!(!is_unit_marker("AB"));
        assert!(!is_unit_marker("ABCDEF"));
        assert!(!is_unit_marker("Cide"));
        assert!(!is_unit_marker("CID3"));
    }

    #[test]
    fn test_unit_marker_wins_over_numeric_cells() {
        let row = ProgrammingRow::from_cells(6, &[text("CIDE"), num(500.0), text("garbage")]);
        assert_eq!(classify(&row), RowKind::UnitMarker { code: "CIDE".to_string() });

        let (state, event) = step(ParseState::default(), &row).unwrap();
        assert_eq!(state.unit.as_deref(), Some("CIDE"));
        assert_eq!(event, RowEvent::Unit { code: "CIDE".to_string() });
    }

    #[test]
    fn test_goal_marker_split() {
        assert_eq!(
            split_goal_marker("0002 - Censos y Encuestas"),
            Some(("0002".to_string(), "Censos y Encuestas".to_string()))
        );
        assert_eq!(
            split_goal_marker("0001 - Administración - Sede Central"),
            Some(("0001".to_string(), "Administración - Sede Central".to_string()))
        );
        // A trailing dash with nothing after it is not a marker once trimmed
        assert_eq!(split_goal_marker("0003 - "), None);
        assert_eq!(split_goal_marker("2002 - Not a goal"), None);
        assert_eq!(split_goal_marker("0002 Censos"), None);
    }

    #[test]
    fn test_dangling_goal_dash_is_a_data_row() {
        let row = ProgrammingRow::from_cells(6, &[text("0003 - "), num(10.0)]);
        assert_eq!(
            classify(&row),
            RowKind::Data {
                classifier: None,
                description: "0003 -".to_string(),
            }
        );
    }

    #[test]
    fn test_classifier_split() {
        assert_eq!(
            split_classifier("2.3.1 Compra de Bienes"),
            (Some("2.3.1".to_string()), "Compra de Bienes".to_string())
        );
        assert_eq!(
            split_classifier("2.1. Personal y Obligaciones Sociales"),
            (Some("2.1.".to_string()), "Personal y Obligaciones Sociales".to_string())
        );
        assert_eq!(
            split_classifier("Total general"),
            (None, "Total general".to_string())
        );
        assert_eq!(split_classifier("2.3. "), (Some("2.3.".to_string()), "2.3.".to_string()));
    }

    #[test]
    fn test_goal_marker_keeps_unit_and_unit_marker_clears_goal() {
        let goal_row = ProgrammingRow::from_cells(7, &[text("0001 - Administración")]);
        let state = ParseState {
            unit: Some("CIDE".to_string()),
            goal: None,
        };
        let (state, _) = step(state, &goal_row).unwrap();
        assert_eq!(state.unit.as_deref(), Some("CIDE"));
        assert_eq!(state.goal.as_deref(), Some("0001"));

        let unit_row = ProgrammingRow::from_cells(8, &[text("DNCE")]);
        let (state, _) = step(state, &unit_row).unwrap();
        assert_eq!(state.unit.as_deref(), Some("DNCE"));
        assert_eq!(state.goal, None);
    }

    #[test]
    fn test_data_row_before_unit_is_skipped_even_if_malformed() {
        let row = ProgrammingRow::from_cells(5, &[text("2.3.1 Bienes"), num(10.0), text("n/a")]);
        let (state, event) = step(ParseState::default(), &row).unwrap();
        assert_eq!(state, ParseState::default());
        assert_eq!(event, RowEvent::Skipped(SkipReason::NoUnitContext));
    }

    #[test]
    fn test_missing_pim_row_is_skipped() {
        let row = ProgrammingRow::from_cells(9, &[text("Subtotal"), Cell::Empty, num(3.0)]);
        assert_eq!(classify(&row), RowKind::MissingPim);

        let row = ProgrammingRow::from_cells(9, &[text("Subtotal"), text("   ")]);
        assert_eq!(classify(&row), RowKind::MissingPim);
    }

    #[test]
    fn test_amounts_default_to_zero_and_drop_monthly_columns() {
        let mut cells = vec![Cell::Empty; Column::COUNT];
        cells[0] = text("2.3.1 Bienes");
        cells[1] = num(125000.0);
        cells[2] = text(" 100000 ");
        cells[3] = num(25000.0);
        cells[8] = num(999.0);
        cells[13] = num(5.5);
        let row = ProgrammingRow::from_cells(10, &cells);

        let amounts = row.amounts().unwrap();
        assert_eq!(amounts.pim, 125000.0);
        assert_eq!(amounts.certificado, 100000.0);
        assert_eq!(amounts.pim_por_certificar, 25000.0);
        assert_eq!(amounts.compromiso_anual, 0.0);
        assert_eq!(amounts.total_anual, 0.0);
        assert_eq!(amounts.saldo, 5.5);
        assert!(!Column::NovProgramacion.is_persisted());
        assert!(Column::Saldo.is_persisted());
    }

    #[test]
    fn test_malformed_cell_reports_row_and_column() {
        let row = ProgrammingRow::from_cells(12, &[text("2.3.1 Bienes"), num(1.0), text("cien")]);
        let err = row.amounts().unwrap_err();
        match err {
            ImportError::MalformedCell { row, column, value } => {
                assert_eq!(row, 12);
                assert_eq!(column, "CERTIFICADO");
                assert_eq!(value, "cien");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_grid_end_to_end() {
        let mut grid = title_block();
        grid.push(vec![text("CIDE")]);
        grid.push(vec![text("0001 - Administración")]);
        grid.push(data_row("2.3.1 Bienes", 125000.0, 100000.0));
        grid.push(vec![text("Sin PIM"), Cell::Empty, num(1.0)]);
        grid.push(vec![]);
        grid.push(vec![text("DNCE")]);
        grid.push(data_row("Servicios diversos", 5000.0, 0.0));

        let staged = parse_grid(&grid).unwrap();

        assert_eq!(staged.units, vec!["CIDE", "DNCE"]);
        assert_eq!(staged.goals.len(), 1);
        assert_eq!(staged.goals[0].code, "0001");
        assert_eq!(staged.goals[0].description, "Administración");
        assert_eq!(staged.records.len(), 2);
        assert_eq!(staged.skipped_rows, 2);

        let first = &staged.records[0];
        assert_eq!(first.row_number, 7);
        assert_eq!(first.unit_code, "CIDE");
        assert_eq!(first.goal_code.as_deref(), Some("0001"));
        assert_eq!(first.classifier.as_deref(), Some("2.3.1"));
        assert_eq!(first.amounts.pim_por_certificar, 25000.0);

        let second = &staged.records[1];
        assert_eq!(second.unit_code, "DNCE");
        assert_eq!(second.goal_code, None);
        assert_eq!(second.classifier, None);
        assert_eq!(second.description, "Servicios diversos");
    }

    #[test]
    fn test_record_count_equals_rows_with_pim() {
        let mut grid = title_block();
        grid.push(vec![text("OTIN")]);
        let pims = [Some(10.0), None, Some(20.0), Some(0.0), None];
        for (i, pim) in pims.iter().enumerate() {
            let pim_cell = pim.map(Cell::Number).unwrap_or(Cell::Empty);
            grid.push(vec![text(&format!("Linea {}", i)), pim_cell, num(1.0)]);
        }

        let staged = parse_grid(&grid).unwrap();
        assert_eq!(staged.records.len(), pims.iter().filter(|p| p.is_some()).count());
    }

    #[test]
    fn test_title_block_is_ignored() {
        // A unit-looking label inside the title block must not open a context
        let grid = vec![
            vec![text("INEI")],
            vec![],
            vec![],
            vec![],
            data_row("2.3.1 Bienes", 1.0, 1.0),
        ];

        let staged = parse_grid(&grid).unwrap();
        assert!(staged.units.is_empty());
        assert!(staged.records.is_empty());
    }

    #[test]
    fn test_header_row_is_consumed_and_validated() {
        let header: Vec<Cell> = std::iter::once(text("DDNNTT / META / CLASIFICADOR"))
            .chain(Column::ALL[1..].iter().map(|c| text(&c.name().replace('_', " "))))
            .collect();

        let mut grid = title_block();
        grid.push(header.clone());
        grid.push(vec![text("CIDE")]);
        grid.push(data_row("Bienes", 1.0, 0.5));
        grid.push(header);

        let staged = parse_grid(&grid).unwrap();
        assert_eq!(staged.records.len(), 1);
        assert_eq!(staged.skipped_rows, 2);
    }

    #[test]
    fn test_header_names_can_reorder_columns() {
        let mut header = vec![text(HEADER_LABEL)];
        header.extend(Column::ALL[1..].iter().map(|c| text(c.name())));
        header.swap(1, 2); // CERTIFICADO first, then PIM

        let layout = ColumnLayout::from_header_row(5, &header).unwrap();
        assert_eq!(layout.position(Column::Certificado), 1);
        assert_eq!(layout.position(Column::Pim), 2);

        let row = layout.typed_row(6, &[text("Bienes"), num(80.0), num(100.0)]);
        let amounts = row.amounts().unwrap();
        assert_eq!(amounts.pim, 100.0);
        assert_eq!(amounts.certificado, 80.0);
    }

    #[test]
    fn test_unrecognized_header_names_use_template_order() {
        let mut header = vec![text(HEADER_LABEL)];
        header.extend((1..Column::COUNT).map(|i| text(&format!("Columna {}", i))));

        assert_eq!(ColumnLayout::from_header_row(5, &header).unwrap(), ColumnLayout::standard());
    }

    #[test]
    fn test_duplicate_header_is_rejected() {
        let mut header = vec![text(HEADER_LABEL)];
        header.extend(Column::ALL[1..].iter().map(|c| text(c.name())));
        header[3] = text("PIM");

        let err = ColumnLayout::from_header_row(5, &header).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateHeader { column: 4, .. }));
    }

    #[test]
    fn test_wide_sheet_fails_fast() {
        let mut grid = title_block();
        grid.push(vec![text("CIDE")]);
        let mut wide = vec![num(1.0); Column::COUNT + 2];
        wide[0] = text("Bienes");
        grid.push(wide);

        let err = parse_grid(&grid).unwrap_err();
        match err {
            ImportError::UnexpectedColumnLayout { row, expected, found } => {
                assert_eq!(row, 6);
                assert_eq!(expected, 14);
                assert_eq!(found, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_header_row_uses_template_order() {
        let mut grid = title_block();
        grid.push(vec![text(HEADER_LABEL), text("PIM"), text("CERTIFICADO")]);
        grid.push(vec![text("CIDE")]);
        grid.push(vec![text("2.3.1 Bienes"), num(100.0), num(80.0)]);

        let staged = parse_grid(&grid).unwrap();
        assert_eq!(staged.records.len(), 1);
        assert_eq!(staged.records[0].amounts.pim, 100.0);
        assert_eq!(staged.records[0].amounts.certificado, 80.0);

        // Blank trailing headers are trimmed away by the readers
        let trimmed: Vec<Cell> = vec![text(HEADER_LABEL), text("CERTIFICADO"), text("PIM")];
        assert_eq!(ColumnLayout::from_header_row(5, &trimmed).unwrap(), ColumnLayout::standard());
    }

    #[test]
    fn test_header_normalization() {
        assert_eq!(Column::from_header("PIM por certificar"), Some(Column::PimPorCertificar));
        assert_eq!(Column::from_header("Devengado"), Some(Column::DevengadoAcumulado));
        assert_eq!(Column::from_header(" Compromiso anual por devengar "), Some(Column::CompromisoAnualPorDevengar));
        assert_eq!(Column::from_header("Descripción"), Some(Column::Label));
        assert_eq!(Column::from_header("Observaciones"), None);
    }
}
