//! CSV exports for the reporting tool.

use std::fs;
use std::path::{Path, PathBuf};

use csv::{StringRecord, Writer};
use ndarray::Array1;
use tracing::info;

use crate::aggregate::AggregateTable;
use crate::error::PipelineError;
use crate::evaluation::{ConfusionMatrix, ModelMetrics};
use crate::frame::{format_float, Frame};

pub const METRICS_FILE: &str = "model_metrics.csv";
pub const CONFUSION_FILE: &str = "confusion_matrix.csv";
pub const SCORED_FILE: &str = "transactions_scored.csv";

/// Writes every export into one directory, overwriting earlier runs.
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    /// Create the output directory if needed.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, PipelineError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn writer(&self, file_name: &str) -> Result<(Writer<fs::File>, PathBuf), PipelineError> {
        let path = self.dir.join(file_name);
        Ok((Writer::from_path(&path)?, path))
    }

    pub fn write_aggregate(&self, table: &AggregateTable<'_>) -> Result<PathBuf, PipelineError> {
        let grouping = table.grouping;
        let (mut wtr, path) = self.writer(grouping.file_name())?;

        // account tables put the amounts before the rate
        let by_account = grouping.reports_total_amount();
        let header = if by_account {
            vec![
                grouping.key_name(),
                "total_transactions",
                "fraud_cases",
                "total_amount",
                "total_fraud_loss_usd",
                "fraud_rate(%)",
            ]
        } else {
            vec![
                grouping.key_name(),
                "total_transactions",
                "fraud_cases",
                "fraud_rate",
                "total_fraud_loss_usd",
            ]
        };
        wtr.write_record(&header)?;

        let mut record = StringRecord::new();
        for row in &table.rows {
            record.clear();
            record.push_field(&row.key.to_string());
            record.push_field(&row.total_transactions.to_string());
            record.push_field(&row.fraud_cases.to_string());
            if by_account {
                record.push_field(&format_float(row.total_amount));
                record.push_field(&format_float(row.total_fraud_loss_usd));
                record.push_field(&format_float(row.fraud_rate()));
            } else {
                record.push_field(&format_float(row.fraud_rate()));
                record.push_field(&format_float(row.total_fraud_loss_usd));
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = table.rows.len(), "Exported");
        Ok(path)
    }

    pub fn write_metrics(&self, metrics: &[ModelMetrics]) -> Result<PathBuf, PipelineError> {
        let (mut wtr, path) = self.writer(METRICS_FILE)?;
        for row in metrics {
            wtr.serialize(row)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = metrics.len(), "Exported");
        Ok(path)
    }

    pub fn write_confusion(&self, cm: &ConfusionMatrix) -> Result<PathBuf, PipelineError> {
        let (mut wtr, path) = self.writer(CONFUSION_FILE)?;
        wtr.write_record(["", "Pred_0", "Pred_1"])?;
        wtr.write_record(["Actual_0".to_string(), cm.tn.to_string(), cm.fp.to_string()])?;
        wtr.write_record(["Actual_1".to_string(), cm.fn_.to_string(), cm.tp.to_string()])?;
        wtr.flush()?;

        info!(path = %path.display(), "Exported");
        Ok(path)
    }

    /// Frame rows `rows`, all columns, followed by `scores` under `column`.
    pub fn write_scored(
        &self,
        frame: &Frame,
        rows: &[usize],
        scores: &Array1<f64>,
        column: &str,
    ) -> Result<PathBuf, PipelineError> {
        if rows.len() != scores.len() {
            return Err(PipelineError::InsufficientData(format!(
                "{} scores for {} scored rows",
                scores.len(),
                rows.len()
            )));
        }
        let (mut wtr, path) = self.writer(SCORED_FILE)?;

        let mut header = StringRecord::from(frame.names().to_vec());
        header.push_field(column);
        wtr.write_record(&header)?;

        let mut record = StringRecord::new();
        for (&row, &score) in rows.iter().zip(scores.iter()) {
            record.clear();
            for col in frame.columns() {
                record.push_field(&col.get(row).to_string());
            }
            record.push_field(&score.to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;

        info!(path = %path.display(), rows = rows.len(), "Exported");
        Ok(path)
    }
}
