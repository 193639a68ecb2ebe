//! Error kinds raised by the warehouse pipelines.
//!
//! An unresolved natural key is NOT an error: it resolves to the sentinel
//! surrogate id `0` and never shows up here.

use std::fmt::Display;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Missing or malformed input file, or a required column is absent.
    #[error("Source read error: {path}: {reason}")]
    SourceRead { path: String, reason: String },

    /// Calendar range is inverted or a month selector is unparseable.
    #[error("Invalid calendar range: {0}")]
    InvalidRange(String),

    /// A measure column held a non-numeric value. Fatal for the chunk.
    #[error("Measure parse error at line {line}: column '{column}' has non-numeric value '{value}'")]
    MeasureParse {
        line: u64,
        column: &'static str,
        value: String,
    },

    /// A fact date could not be turned into an integer date_id.
    #[error("Date parse error at line {line}: '{value}' is not a YYYY-MM-DD date")]
    DateParse { line: u64, value: String },

    /// The destination rejected a write.
    #[error("Load error: table '{table}': {reason}")]
    Load { table: String, reason: String },
}

impl WarehouseError {
    pub fn source_read(path: &Path, reason: impl Display) -> Self {
        Self::SourceRead {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn load(table: &str, reason: impl Display) -> Self {
        Self::Load {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
