use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::PipelineError;
use crate::frame::{Datum, Frame, FrameBuilder};
use crate::source::TransactionSource;

/// Reads the transaction relation from a CSV snapshot with a header row.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl TransactionSource for CsvSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    async fn load(&self) -> Result<Frame, PipelineError> {
        read_transactions(&self.path)
    }
}

pub fn read_transactions<P: AsRef<Path>>(file_path: P) -> Result<Frame, PipelineError> {
    let rdr = csv::Reader::from_path(file_path.as_ref())?;
    let frame = read_frame(rdr)?;
    info!(
        path = %file_path.as_ref().display(),
        rows = frame.n_rows(),
        "Read CSV snapshot"
    );
    Ok(frame)
}

pub fn read_frame<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<Frame, PipelineError> {
    let mut builder = FrameBuilder::new(rdr.headers()?.iter())?;

    for record in rdr.records() {
        let record = record?;
        builder.push_row(record.iter().map(Datum::parse).collect())?;
    }

    Ok(builder.finish())
}
