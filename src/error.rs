// Error type for programming-sheet imports.
//
// Callers only ever show the rendered message, but keeping the variants
// apart lets tests and the HTTP layer tell layout problems from bad cells.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// File could not be opened or decoded
    #[error("could not read sheet: {0:#}")]
    Read(anyhow::Error),

    /// Sheet does not have the expected 14-column layout
    #[error("unexpected column layout at row {row}: expected {expected} columns, found {found}")]
    UnexpectedColumnLayout {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Header row names the same column twice
    #[error("unexpected column layout: duplicate header {header:?} in column {column}")]
    DuplicateHeader { column: usize, header: String },

    /// Non-numeric value in a numeric column of a data row
    #[error("malformed value {value:?} in column {column} at row {row}")]
    MalformedCell {
        row: usize,
        column: &'static str,
        value: String,
    },

    /// Database failure while staging or committing the import
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Storage(err.into())
    }
}

impl ImportError {
    /// True for problems with the uploaded file itself (as opposed to the database)
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ImportError::Storage(_))
    }
}
