// Batch fraud analytics job. Loads the cleaned transaction relation, writes
// grouped fraud statistics, trains three classifiers and exports their
// held-out metrics together with a scored copy of the data.
use std::process::ExitCode;

use anyhow::{Context, Result};
use fraud_analysis::config::AppConfig;
use fraud_analysis::{logging, pipeline, source};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let chain = format!("{:#}", e);
            error!(error = %chain, "Pipeline failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig) -> Result<()> {
    info!(
        export_dir = %config.pipeline.export_dir.display(),
        seed = config.modeling.seed,
        "Starting fraud analysis"
    );

    let source = source::from_config(config)
        .await
        .context("failed to open transaction source")?;
    let summary = pipeline::run(config, source.as_ref())
        .await
        .context("pipeline run failed")?;

    info!(
        rows = summary.rows,
        modeled_rows = summary.modeled_rows,
        files = summary.files.len(),
        "Exports written"
    );
    Ok(())
}
