//! One batch run: load, aggregate, model, export.

use std::path::PathBuf;
use std::time::Instant;

use tracing::info;

use crate::aggregate::aggregate_all;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::export::Exporter;
use crate::features::assemble;
use crate::source::TransactionSource;
use crate::training::{self, SCORE_COLUMN};

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Rows loaded from the source
    pub rows: usize,
    /// Rows that reached the models
    pub modeled_rows: usize,
    pub files: Vec<PathBuf>,
}

/// Run both stages against `source`. Nothing is written until the frame has
/// loaded, so a failed connection leaves the export directory untouched.
pub async fn run(
    config: &AppConfig,
    source: &dyn TransactionSource,
) -> Result<RunSummary, PipelineError> {
    let started = Instant::now();
    info!(source = %source.describe(), "Loading transactions");
    let frame = source.load().await?;
    info!(
        rows = frame.n_rows(),
        columns = frame.n_columns(),
        "Loaded transactions"
    );

    let exporter = Exporter::create(&config.pipeline.export_dir)?;
    let mut files = Vec::new();

    // Aggregation stage
    for table in aggregate_all(&frame)? {
        files.push(exporter.write_aggregate(&table)?);
    }

    // Modeling stage
    let matrix = assemble(&frame)?;
    let report = training::run(&matrix, &config.modeling)?;
    files.push(exporter.write_metrics(&report.metrics)?);
    files.push(exporter.write_confusion(&report.confusion)?);
    files.push(exporter.write_scored(&frame, &matrix.source_rows, &report.scores, SCORE_COLUMN)?);

    info!(
        files = files.len(),
        dir = %exporter.dir().display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Pipeline finished"
    );
    Ok(RunSummary {
        rows: frame.n_rows(),
        modeled_rows: matrix.n_samples(),
        files,
    })
}
