//! Error types for tally
//!
//! One enum for the whole pipeline. Parse failures propagate; dropped rows
//! are logged by the loaders and never surface here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tally error types
#[derive(Error, Debug)]
pub enum Error {
    /// Duration text could not be parsed
    #[error("Duration parse error: {0}")]
    ParseError(String),

    /// Age band configuration would produce empty or overlapping bands
    #[error("Invalid age band configuration: {0}\nBands need step > 0 and end > start")]
    InvalidBands(String),

    /// A requested record does not exist in the loaded table
    #[error("Missing data: {0}")]
    MissingData(String),

    /// Bad argument (unknown column, k = 0, unsupported type)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Arrow batch construction, CSV export)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
