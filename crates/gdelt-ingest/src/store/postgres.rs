//! PostgreSQL record store

use super::RecordStore;
use crate::error::{IngestError, Result};
use crate::schema::{quote_ident, ColumnType, Row, TableSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// PostgreSQL accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_NAME: &str = "gdelt_raw";
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Connection parameters; `url` wins over the individual parts when set
#[derive(Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// Defaults to one connection per worker plus one
    pub max_connections: Option<u32>,
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DB_NAME.to_string(),
            max_connections: None,
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: std::env::var("DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            user: std::env::var("DB_USER").unwrap_or(defaults.user),
            password: std::env::var("DB_PASSWORD").unwrap_or(defaults.password),
            database: std::env::var("DB_NAME").unwrap_or(defaults.database),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok()),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            PgConnectOptions::from_str(url)
                .map_err(|e| IngestError::config(format!("invalid DATABASE_URL: {}", e)))?;
        } else if self.host.is_empty() || self.database.is_empty() {
            return Err(IngestError::config("DB_HOST and DB_NAME cannot be empty"));
        }
        if self.max_connections == Some(0) {
            return Err(IngestError::config("DB_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.url {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|e| IngestError::config(format!("invalid DATABASE_URL: {}", e))),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.database)),
        }
    }
}

pub async fn create_pool(config: &DbConfig, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(config.connect_options()?)
        .await?;

    info!(max_connections, "Database connection pool created");
    Ok(pool)
}

fn cast_suffix(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "::BIGINT",
        ColumnType::Float => "::DOUBLE PRECISION",
        ColumnType::Text => "",
        ColumnType::Date => "::DATE",
    }
}

/// Rows that fit into one statement without exceeding the bind limit
fn rows_per_statement(schema: &TableSchema) -> usize {
    (MAX_BIND_PARAMS / schema.width().max(1)).max(1)
}

/// Multi-row `INSERT ... ON CONFLICT DO NOTHING` for `rows`
///
/// Values are bound as text and cast server-side, so the database alone
/// decides whether a field fits its column type.
pub fn build_insert<'a>(schema: &TableSchema, rows: &'a [Row]) -> QueryBuilder<'a, Postgres> {
    let columns = schema
        .column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    let key = schema
        .primary_key
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder =
        QueryBuilder::new(format!("INSERT INTO {} ({}) ", quote_ident(schema.name), columns));

    builder.push_values(rows, |mut values, row| {
        for (value, column) in row.values().iter().zip(schema.columns) {
            values
                .push_bind(value.as_deref())
                .push_unseparated(cast_suffix(column.ty));
        }
    });
    builder.push(format!(" ON CONFLICT ({}) DO NOTHING", key));
    builder
}

/// [`RecordStore`] over a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DbConfig, max_connections: u32) -> Result<Self> {
        Ok(Self::new(create_pool(config, max_connections).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        sqlx::query(&schema.create_table_sql())
            .execute(&self.pool)
            .await?;
        debug!(table = schema.name, "Table ready");
        Ok(())
    }

    async fn max_timestamp(&self, schema: &TableSchema) -> Result<Option<String>> {
        let sql = format!(
            "SELECT MAX({})::TEXT FROM {}",
            quote_ident(schema.timestamp_column),
            quote_ident(schema.name)
        );
        let max: Option<String> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max)
    }

    async fn insert_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(rows_per_statement(schema)) {
            let outcome = build_insert(schema, chunk).build().execute(&mut *tx).await;
            match outcome {
                Ok(done) => inserted += done.rows_affected(),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(table = schema.name, error = %rollback, "Rollback failed");
                    }
                    return Err(e.into());
                },
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Database connection pool closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{EVENTS_SCHEMA, GKG_SCHEMA};

    #[test]
    fn test_rows_per_statement_respects_bind_limit() {
        let n = rows_per_statement(&EVENTS_SCHEMA);
        assert!(n * EVENTS_SCHEMA.width() <= MAX_BIND_PARAMS);
        assert!((n + 1) * EVENTS_SCHEMA.width() > MAX_BIND_PARAMS);
    }

    #[test]
    fn test_build_insert_sql() {
        let values = (0..GKG_SCHEMA.width())
            .map(|i| (i != 3).then(|| i.to_string()))
            .collect();
        let rows = vec![Row::new(&GKG_SCHEMA, values).unwrap()];

        let builder = build_insert(&GKG_SCHEMA, &rows);
        let sql = builder.sql();

        assert!(sql.starts_with("INSERT INTO \"gkg\" (\"GKGRECORDID\", \"DATE\", "));
        assert!(sql.contains("VALUES ($1, $2::BIGINT, $3::BIGINT, $4, "));
        assert!(sql.ends_with(" ON CONFLICT (\"GKGRECORDID\") DO NOTHING"));
    }

    #[test]
    fn test_db_config_defaults_and_validation() {
        let config = DbConfig::default();
        assert_eq!(config.database, "gdelt_raw");
        assert!(config.validate().is_ok());
        assert!(config.connect_options().is_ok());

        let bad = DbConfig {
            url: Some("not-a-url".to_string()),
            ..DbConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = DbConfig {
            url: Some("postgresql://u:secret@db/gdelt".to_string()),
            password: "secret".to_string(),
            ..DbConfig::default()
        };
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
