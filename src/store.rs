//! PostgreSQL source: connection bootstrap with bounded retry, and a full scan
//! of the configured relation.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::PipelineError;
use crate::frame::{Datum, Frame, FrameBuilder};
use crate::source::TransactionSource;

const PROGRESS_EVERY: usize = 500_000;

pub struct PostgresSource {
    connection: Mutex<PgConnection>,
    relation: String,
}

impl PostgresSource {
    /// Connect, retrying transient failures with a fixed delay. Each attempt
    /// is bounded by `connect_timeout`. The schema is installed as the session
    /// `search_path`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PipelineError> {
        let schema = identifier("database.schema", &config.schema)?;
        let table = identifier("database.table", &config.table)?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .options([("search_path", schema)]);

        let backoff = ConstantBuilder::default()
            .with_delay(config.retry_delay())
            .with_max_times(config.connect_attempts.saturating_sub(1));

        let attempts = AtomicUsize::new(0);
        let timeout = config.connect_timeout();
        let (options, counter) = (&options, &attempts);
        let connect = move || async move {
            counter.fetch_add(1, Ordering::Relaxed);
            match tokio::time::timeout(timeout, PgConnection::connect_with(options)).await {
                Ok(result) => result,
                Err(_) => Err(sqlx::Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {} ms", timeout.as_millis()),
                ))),
            }
        };

        let connection = connect
            .retry(backoff)
            .when(is_transient)
            .notify(|err: &sqlx::Error, delay: Duration| {
                warn!(
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Retrying database connection"
                );
            })
            .await
            .map_err(|source| PipelineError::Connect {
                attempts: attempts.load(Ordering::Relaxed),
                source,
            })?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            schema = %schema,
            "Connected to PostgreSQL"
        );

        Ok(Self {
            connection: Mutex::new(connection),
            relation: format!("{}.{}", schema, table),
        })
    }
}

#[async_trait]
impl TransactionSource for PostgresSource {
    fn describe(&self) -> String {
        format!("postgres:{}", self.relation)
    }

    async fn load(&self) -> Result<Frame, PipelineError> {
        // row_to_json keeps the relation's column order
        let query = format!("SELECT row_to_json(t) AS record FROM {} t", self.relation);
        let mut connection = self.connection.lock().await;
        let mut rows = sqlx::query(&query).fetch(&mut *connection);

        let mut builder: Option<FrameBuilder> = None;
        let mut count = 0usize;
        while let Some(row) = rows.try_next().await? {
            let record: Value = row.try_get("record")?;
            let mut frame = match builder.take() {
                Some(frame) => frame,
                None => FrameBuilder::new(record_names(&record))?,
            };
            let cells = record_row(frame.names(), record);
            frame.push_row(cells)?;
            builder = Some(frame);

            count += 1;
            if count % PROGRESS_EVERY == 0 {
                debug!(rows = count, "Loading transactions");
            }
        }

        builder.map(FrameBuilder::finish).ok_or_else(|| {
            PipelineError::InsufficientData(format!("relation {} returned no rows", self.relation))
        })
    }
}

/// Connection errors worth another attempt.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => true,
        // cannot_connect_now: the server is starting up or shutting down
        sqlx::Error::Database(db) => db.code().as_deref() == Some("57P03"),
        _ => false,
    }
}

fn identifier<'a>(field: &'static str, value: &'a str) -> Result<&'a str, PipelineError> {
    let mut chars = value.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(value)
    } else {
        Err(PipelineError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}

fn record_names(record: &Value) -> Vec<String> {
    match record {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Cells of one JSON record in frame column order. Case is folded the same
/// way the frame folds its column names.
fn record_row(names: &[String], record: Value) -> Vec<Datum> {
    let mut map = match record {
        Value::Object(map) => map,
        _ => return vec![Datum::Null; names.len()],
    };
    if map.keys().any(|k| k.chars().any(|c| c.is_uppercase())) {
        map = map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
    }
    names
        .iter()
        .map(|name| map.remove(name).map(Datum::from).unwrap_or(Datum::Null))
        .collect()
}
