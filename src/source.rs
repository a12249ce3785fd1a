//! Where the transaction relation comes from.

use async_trait::async_trait;
use tracing::info;

use crate::config::AppConfig;
use crate::csv_reader::CsvSource;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::store::PostgresSource;

/// A read-only provider of the full transaction relation.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Human-readable origin of the data, for logs.
    fn describe(&self) -> String;

    /// Load every row. Called once per run.
    async fn load(&self) -> Result<Frame, PipelineError>;
}

/// Pick the source named by the configuration: a CSV snapshot when
/// `pipeline.input_csv` is set, PostgreSQL otherwise.
pub async fn from_config(config: &AppConfig) -> Result<Box<dyn TransactionSource>, PipelineError> {
    match &config.pipeline.input_csv {
        Some(path) => {
            info!(path = %path.display(), "Reading transactions from CSV snapshot");
            Ok(Box::new(CsvSource::new(path)))
        }
        None => Ok(Box::new(PostgresSource::connect(&config.database).await?)),
    }
}
