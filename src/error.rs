//! Error taxonomy for the reconciliation core.
//!
//! Library operations return [`Result`] with a [`ReconcileError`]; command
//! handlers wrap these with `anyhow` context before reporting them.

use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("No header row found in the first {window} row(s) of {path:?}{}", sheet_suffix(.sheet))]
    MalformedTable {
        path: PathBuf,
        sheet: Option<String>,
        window: usize,
    },
    #[error("Unsupported file format '{extension}' for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("Unable to read {path:?}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },
    #[error("Could not resolve a key column for '{origin}'; select one explicitly")]
    NoKeyColumn { origin: String },
    #[error("Column '{column}' not found in '{origin}'")]
    UnknownColumn { origin: String, column: String },
    #[error("The selected analysis produced no rows to report")]
    EmptyResult,
    #[error("Sheet '{sheet}' needs {rows} row(s) but the format allows at most {limit}")]
    SheetRowLimit {
        sheet: String,
        rows: usize,
        limit: usize,
    },
    #[error("Failed to write report to {path:?}: {source}")]
    FatalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn sheet_suffix(sheet: &Option<String>) -> String {
    match sheet {
        Some(name) => format!(" (sheet '{name}')"),
        None => String::new(),
    }
}

impl ReconcileError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ReconcileError::CorruptFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_table_mentions_sheet_when_present() {
        let err = ReconcileError::MalformedTable {
            path: PathBuf::from("book.xlsx"),
            sheet: Some("Hoja1".to_string()),
            window: 20,
        };
        let message = err.to_string();
        assert!(message.contains("first 20 row(s)"));
        assert!(message.contains("sheet 'Hoja1'"));
    }

    #[test]
    fn malformed_table_omits_sheet_for_delimited_sources() {
        let err = ReconcileError::MalformedTable {
            path: PathBuf::from("data.csv"),
            sheet: None,
            window: 20,
        };
        assert!(!err.to_string().contains("sheet"));
    }
}
