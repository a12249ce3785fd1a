//! Feature matrix for the modeling stage.

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::aggregate::LABEL_COLUMN;
use crate::error::PipelineError;
use crate::frame::{Column, Frame};
use crate::models::LabeledDataset;

/// Model inputs, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 12] = [
    "amount",
    "oldbalanceorg",
    "newbalanceorig",
    "oldbalancedest",
    "newbalancedest",
    "balance_delta",
    "balance_change_ratio",
    "is_cashout",
    "is_payment",
    "is_transfer",
    "is_cashin",
    "is_merchant",
];

/// Complete rows of the frame as a dense matrix plus binary labels.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub records: Array2<f64>,
    pub labels: Array1<usize>,
    /// Frame row index of every matrix row
    pub source_rows: Vec<usize>,
}

impl FeatureMatrix {
    pub fn n_samples(&self) -> usize {
        self.records.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.records.ncols()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y == 1).count()
    }

    /// Rows `indices` as a linfa dataset.
    pub fn subset(&self, indices: &[usize]) -> LabeledDataset {
        let records = self.records.select(ndarray::Axis(0), indices);
        let labels = self.labels.select(ndarray::Axis(0), indices);
        LabeledDataset::new(records, labels)
    }
}

/// Build the feature matrix. Rows with a null, NaN or infinite value in any
/// feature or the label are dropped; the frame itself is left untouched.
pub fn assemble(frame: &Frame) -> Result<FeatureMatrix, PipelineError> {
    let columns: Vec<&Column> = FEATURE_COLUMNS
        .iter()
        .map(|name| frame.require(name))
        .collect::<Result<_, _>>()?;
    let label_column = frame.require(LABEL_COLUMN)?;

    let mut values: Vec<f64> = Vec::with_capacity(frame.n_rows() * columns.len());
    let mut labels: Vec<usize> = Vec::with_capacity(frame.n_rows());
    let mut source_rows: Vec<usize> = Vec::with_capacity(frame.n_rows());
    let mut row_values: Vec<f64> = Vec::with_capacity(columns.len());

    'rows: for row in 0..frame.n_rows() {
        let label = match label_column.get(row).as_f64() {
            Some(v) if v.is_finite() => v,
            _ => continue,
        };

        row_values.clear();
        for column in &columns {
            match column.get(row).as_f64() {
                Some(v) if v.is_finite() => row_values.push(v),
                _ => continue 'rows,
            }
        }

        let label = match label {
            l if l == 0.0 => 0,
            l if l == 1.0 => 1,
            value => return Err(PipelineError::NonBinaryLabel { row, value }),
        };

        values.extend_from_slice(&row_values);
        labels.push(label);
        source_rows.push(row);
    }

    let dropped = frame.n_rows() - source_rows.len();
    if source_rows.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "no complete rows left for modeling ({} dropped)",
            dropped
        )));
    }

    let records = Array2::from_shape_vec((source_rows.len(), columns.len()), values)
        .map_err(|e| PipelineError::InsufficientData(e.to_string()))?;

    if dropped > 0 {
        debug!(dropped, "Dropped rows with missing or non-finite features or label");
    }
    let matrix = FeatureMatrix {
        records,
        labels: Array1::from(labels),
        source_rows,
    };
    info!(
        rows = matrix.n_samples(),
        features = matrix.n_features(),
        positives = matrix.positives(),
        "Assembled feature matrix"
    );
    Ok(matrix)
}
