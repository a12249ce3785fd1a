use thiserror::Error;

use crate::models::ModelError;

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid SQL identifier for {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("could not connect to PostgreSQL after {attempts} attempt(s)")]
    Connect {
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("row {row} has {found} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("required column missing from input: {0}")]
    MissingColumn(String),

    #[error("label in row {row} is not binary: {value}")]
    NonBinaryLabel { row: usize, value: f64 },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}
