//! Shared test utilities for gdelt-ingest integration tests
//!
//! [`MemoryStore`] is an in-process [`RecordStore`] with the same contract as
//! the PostgreSQL store: primary keys are enforced with "skip on conflict",
//! numeric columns must parse, and a batch is all-or-nothing. Tests can make
//! individual watermark queries fail to exercise the degraded paths.
//!
//! [`TestPostgres`] starts a throwaway PostgreSQL container for the tests that
//! need the real thing.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use gdelt_ingest::schema::{ColumnType, Row, TableSchema};
use gdelt_ingest::store::RecordStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

type Key = Vec<Option<String>>;

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, BTreeMap<Key, Row>>>,
    failing_watermarks: Mutex<HashSet<&'static str>>,
    batches: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `max_timestamp` fail for `table`
    pub fn fail_watermark_for(&self, table: &'static str) {
        self.failing_watermarks.lock().unwrap().insert(table);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `insert_batch` calls, successful or not
    pub fn batches_attempted(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn type_error(schema: &TableSchema, column: &str, value: &str) -> gdelt_ingest::IngestError {
    sqlx::Error::Protocol(format!(
        "invalid input for {}.{}: {:?}",
        schema.name, column, value
    ))
    .into()
}

fn check_types(schema: &TableSchema, row: &Row) -> gdelt_ingest::Result<()> {
    for (value, column) in row.values().iter().zip(schema.columns) {
        let Some(value) = value else { continue };
        let ok = match column.ty {
            ColumnType::Integer => value.parse::<i64>().is_ok(),
            ColumnType::Float => value.parse::<f64>().is_ok(),
            ColumnType::Text | ColumnType::Date => true,
        };
        if !ok {
            return Err(type_error(schema, column.name, value));
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ensure_table(&self, schema: &TableSchema) -> gdelt_ingest::Result<()> {
        self.tables.lock().unwrap().entry(schema.name).or_default();
        Ok(())
    }

    async fn max_timestamp(&self, schema: &TableSchema) -> gdelt_ingest::Result<Option<String>> {
        if self.failing_watermarks.lock().unwrap().contains(schema.name) {
            return Err(sqlx::Error::Protocol(format!("relation {} unavailable", schema.name)).into());
        }

        let index = schema
            .columns
            .iter()
            .position(|c| c.name == schema.timestamp_column)
            .expect("timestamp column present in schema");

        let tables = self.tables.lock().unwrap();
        let max = tables.get(schema.name).and_then(|rows| {
            rows.values()
                .filter_map(|row| row.get(index))
                .max_by_key(|value| value.parse::<i64>().unwrap_or(i64::MIN))
                .map(str::to_string)
        });
        Ok(max)
    }

    async fn insert_batch(&self, schema: &TableSchema, rows: &[Row]) -> gdelt_ingest::Result<u64> {
        self.batches.fetch_add(1, Ordering::SeqCst);

        for row in rows {
            check_types(schema, row)?;
        }

        let keys = schema.key_indices();
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(schema.name).or_default();

        let mut inserted = 0;
        for row in rows {
            let key: Key = keys.iter().map(|&i| row.get(i).map(str::to_string)).collect();
            if !table.contains_key(&key) {
                table.insert(key, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Field values for one feed record
///
/// Numeric columns get `key`, text columns a key-derived string, and the
/// timestamp column `timestamp`, so each `key` yields a distinct primary key
/// in every table.
pub fn feed_fields(schema: &TableSchema, key: i64, timestamp: &str) -> Vec<String> {
    schema
        .columns
        .iter()
        .map(|column| {
            if column.name == schema.timestamp_column {
                return timestamp.to_string();
            }
            match column.ty {
                ColumnType::Integer => key.to_string(),
                ColumnType::Float => format!("{}.5", key),
                ColumnType::Text | ColumnType::Date => format!("https://news.example/{}", key),
            }
        })
        .collect()
}

pub fn feed_line(schema: &TableSchema, key: i64, timestamp: &str) -> String {
    feed_fields(schema, key, timestamp).join("\t")
}

/// Tab-separated body with one record per key
pub fn feed_body(schema: &TableSchema, keys: impl IntoIterator<Item = i64>, timestamp: &str) -> String {
    keys.into_iter()
        .map(|key| feed_line(schema, key, timestamp) + "\n")
        .collect()
}

/// Index of the first non-key integer column, handy for poisoning a record
pub fn non_key_integer_column(schema: &TableSchema) -> usize {
    schema
        .columns
        .iter()
        .position(|c| {
            c.ty == ColumnType::Integer
                && c.name != schema.timestamp_column
                && !schema.primary_key.contains(&c.name)
        })
        .expect("schema has a non-key integer column")
}

/// Zip `body` as a single entry named `entry_name`
pub fn zip_bytes(entry_name: &str, body: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(entry_name, zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(body.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn write_file(path: &Path, contents: &[u8]) {
    std::fs::write(path, contents).unwrap();
}

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gdelt_ingest=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}
