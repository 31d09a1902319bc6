// 📄 Sheet readers
// Turn an uploaded workbook (xlsx/xls/ods) or a CSV export into a plain cell grid.
//
// Readers know nothing about budget semantics. They only preserve cell
// positions and the native numeric/text/blank typing of each cell.

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One spreadsheet cell, reduced to what the importer cares about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// Blank cell, whitespace-only text, or a spreadsheet error value (#N/A, #REF!, ...)
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Build a text cell, collapsing blank text to `Empty`
    pub fn text(value: &str) -> Cell {
        if value.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Render the cell the way the spreadsheet shows it.
    /// Integral numbers print without a fractional part ("2", not "2.0").
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Error(_) => Cell::Empty,
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::String(s) => Cell::text(s),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Text(dt.to_string()),
            Data::DateTimeIso(s) => Cell::Text(s.clone()),
            Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

/// Rows of cells with absolute positions: `grid[r][c]` is sheet row r, column c (0-based).
/// Trailing empty cells are trimmed, so rows may differ in length.
pub type CellGrid = Vec<Vec<Cell>>;

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SheetFormat {
    Xlsx,
    Xls,
    Ods,
    Csv,
}

impl SheetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SheetFormat::Xlsx => "xlsx",
            SheetFormat::Xls => "xls",
            SheetFormat::Ods => "ods",
            SheetFormat::Csv => "csv",
        }
    }

    /// Parse a format name or file extension ("xlsx", ".CSV", "xlsm", ...)
    pub fn from_extension(ext: &str) -> Option<SheetFormat> {
        match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
            "xlsx" | "xlsm" | "xlsb" => Some(SheetFormat::Xlsx),
            "xls" => Some(SheetFormat::Xls),
            "ods" => Some(SheetFormat::Ods),
            "csv" | "txt" => Some(SheetFormat::Csv),
            _ => None,
        }
    }

    pub fn is_workbook(&self) -> bool {
        !matches!(self, SheetFormat::Csv)
    }
}

impl fmt::Display for SheetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

// ============================================================================
// READER TRAIT + FACTORY
// ============================================================================

/// SheetReader - reads the first worksheet of an upload into a `CellGrid`.
/// Files on disk are read into memory first so the importer can fingerprint them.
pub trait SheetReader: Send + Sync {
    /// Read an in-memory upload (HTTP body, test fixture)
    fn read_bytes(&self, bytes: &[u8]) -> Result<CellGrid>;

    fn format(&self) -> SheetFormat;
}

/// Detect the upload format from the file extension
pub fn detect_format(path: &Path) -> Result<SheetFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    SheetFormat::from_extension(ext)
        .ok_or_else(|| anyhow!("Unsupported file type: {}", path.display()))
}

pub fn get_reader(format: SheetFormat) -> Box<dyn SheetReader> {
    match format {
        SheetFormat::Csv => Box::new(CsvSheetReader::new()),
        other => Box::new(WorkbookReader::new(other)),
    }
}

// ============================================================================
// WORKBOOK READER (calamine)
// ============================================================================

pub struct WorkbookReader {
    format: SheetFormat,
}

impl WorkbookReader {
    pub fn new(format: SheetFormat) -> Self {
        WorkbookReader { format }
    }
}

impl SheetReader for WorkbookReader {
    fn read_bytes(&self, bytes: &[u8]) -> Result<CellGrid> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .with_context(|| format!("Failed to open uploaded {} workbook", self.format))?;
        first_sheet_grid(workbook)
    }

    fn format(&self) -> SheetFormat {
        self.format
    }
}

fn first_sheet_grid<RS: Read + Seek>(mut workbook: Sheets<RS>) -> Result<CellGrid> {
    let range = workbook
        .worksheet_range_at(0)
        .context("Workbook has no worksheets")?
        .context("Failed to read first worksheet")?;

    Ok(grid_from_range(&range))
}

/// Copy a calamine range into a grid anchored at A1.
/// Ranges start at the first used cell, so leading rows/columns are padded back in.
pub fn grid_from_range(range: &Range<Data>) -> CellGrid {
    let (start_row, start_col) = match range.start() {
        Some(start) => start,
        None => return Vec::new(),
    };

    let mut grid: CellGrid = vec![Vec::new(); start_row as usize];

    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col as usize];
        cells.extend(row.iter().map(Cell::from));
        trim_trailing_empty(&mut cells);
        grid.push(cells);
    }

    grid
}

// ============================================================================
// CSV READER
// ============================================================================

pub struct CsvSheetReader;

impl CsvSheetReader {
    pub fn new() -> Self {
        CsvSheetReader
    }
}

/// Split on line terminators outside quoted fields.
/// A final terminator does not open an extra row.
fn split_rows(bytes: &[u8]) -> Vec<&[u8]> {
    let mut rows = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                rows.push(&bytes[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < bytes.len() {
        rows.push(&bytes[start..]);
    }

    rows
}

fn parse_csv_row(row: &[u8]) -> Result<Vec<Cell>> {
    use csv::ReaderBuilder;

    let row = row.strip_suffix(b"\r").unwrap_or(row);
    if row.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(row);

    let mut cells: Vec<Cell> = match reader.records().next() {
        Some(record) => record?.iter().map(Cell::text).collect(),
        None => Vec::new(),
    };
    trim_trailing_empty(&mut cells);
    Ok(cells)
}

impl Default for CsvSheetReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetReader for CsvSheetReader {
    fn read_bytes(&self, bytes: &[u8]) -> Result<CellGrid> {
        if bytes.is_empty() {
            bail!("Uploaded file is empty");
        }

        // One grid row per sheet row, blank lines included, so the fixed
        // title-block offset holds.
        split_rows(bytes)
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                parse_csv_row(row).with_context(|| format!("Failed to parse CSV row {}", index + 1))
            })
            .collect()
    }

    fn format(&self) -> SheetFormat {
        SheetFormat::Csv
    }
}

fn trim_trailing_empty(cells: &mut Vec<Cell>) {
    while matches!(cells.last(), Some(Cell::Empty)) {
        cells.pop();
    }
}
