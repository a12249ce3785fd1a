//! Configuration for the pipeline.
//!
//! Layers, lowest to highest precedence: built-in defaults, an optional
//! `config/pipeline.toml`, `FRAUD_`-prefixed environment variables (`__`
//! separates sections, e.g. `FRAUD_PIPELINE__EXPORT_DIR`), and finally the
//! `PG_*` connection variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "config/pipeline";

/// Connection variables and the keys they override.
const PG_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PG_USER", "database.user"),
    ("PG_PASS", "database.password"),
    ("PG_HOST", "database.host"),
    ("PG_PORT", "database.port"),
    ("PG_DB", "database.name"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub modeling: ModelingConfig,
    pub logging: LoggingConfig,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    /// Schema holding the input relation; also set as the session search_path
    pub schema: String,
    pub table: String,
    /// Total connection attempts before the run is aborted
    pub connect_attempts: usize,
    /// Fixed delay between connection attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Upper bound on a single connection attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Directory the CSV exports are written to
    pub export_dir: PathBuf,
    /// Read the input relation from this CSV file instead of PostgreSQL
    #[serde(default)]
    pub input_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelingConfig {
    /// Seed for the train/test split and every tree ensemble
    pub seed: u64,
    /// Share of rows held out for evaluation
    pub test_ratio: f64,
    /// Worker threads for ensemble training (0 = one per core)
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    pub level: String,
    /// Log format (pretty, json)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Load configuration from an explicit set of environment variables.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("database.user", "postgres")?
            .set_default("database.password", "postgres")?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.name", "ddb")?
            .set_default("database.schema", "fraud")?
            .set_default("database.table", "transactions_clean")?
            .set_default("database.connect_attempts", 5)?
            .set_default("database.retry_delay_ms", 2000)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("pipeline.export_dir", "exports")?
            .set_default("modeling.seed", 42)?
            .set_default("modeling.test_ratio", 0.2)?
            .set_default("modeling.workers", 0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix("FRAUD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars.clone())),
            );

        for (var, key) in PG_ENV_OVERRIDES {
            builder = builder.set_override_option(*key, vars.get(*var).cloned())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.connect_attempts == 0 {
            return Err(ConfigError::Message(
                "database.connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.database.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "database.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.modeling.test_ratio > 0.0 && self.modeling.test_ratio < 1.0) {
            return Err(ConfigError::Message(format!(
                "modeling.test_ratio must be in (0, 1), got {}",
                self.modeling.test_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(HashMap::new()).unwrap();
        assert_eq!(config.database.user, "postgres");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.name, "ddb");
        assert_eq!(config.database.schema, "fraud");
        assert_eq!(config.database.table, "transactions_clean");
        assert_eq!(config.database.connect_attempts, 5);
        assert_eq!(config.database.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.database.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.pipeline.export_dir, PathBuf::from("exports"));
        assert!(config.pipeline.input_csv.is_none());
        assert_eq!(config.modeling.seed, 42);
        assert_eq!(config.modeling.test_ratio, 0.2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_pg_variables_override() {
        let config = AppConfig::from_vars(vars(&[
            ("PG_USER", "analyst"),
            ("PG_PASS", "secret"),
            ("PG_HOST", "db.internal"),
            ("PG_PORT", "6543"),
            ("PG_DB", "warehouse"),
        ]))
        .unwrap();
        assert_eq!(config.database.user, "analyst");
        assert_eq!(config.database.password, "secret");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.name, "warehouse");
    }

    #[test]
    fn test_prefixed_variables_override() {
        let config = AppConfig::from_vars(vars(&[
            ("FRAUD_PIPELINE__EXPORT_DIR", "/tmp/out"),
            ("FRAUD_PIPELINE__INPUT_CSV", "snapshot.csv"),
            ("FRAUD_MODELING__WORKERS", "2"),
            ("FRAUD_LOGGING__FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.pipeline.export_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.pipeline.input_csv, Some(PathBuf::from("snapshot.csv")));
        assert_eq!(config.modeling.workers, 2);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_test_ratio_rejected() {
        let result = AppConfig::from_vars(vars(&[("FRAUD_MODELING__TEST_RATIO", "1.5")]));
        assert!(result.is_err());
    }
}
