//! Destination store abstraction
//!
//! The pipeline only talks to the database through [`RecordStore`]. The
//! production implementation is [`postgres::PgStore`], backed by a connection
//! pool so that every batch checks out its own connection and transaction.

pub mod postgres;

use crate::error::Result;
use crate::schema::{Row, TableSchema};
use async_trait::async_trait;

pub use postgres::{DbConfig, PgStore};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the table and its primary key if absent
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()>;

    /// Greatest value of the table's timestamp column, as text
    async fn max_timestamp(&self, schema: &TableSchema) -> Result<Option<String>>;

    /// Insert `rows` in a single transaction, silently skipping primary-key
    /// conflicts. Returns the number of rows actually inserted. On error
    /// nothing from this batch is kept.
    async fn insert_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64>;

    /// Release connections; called once when a run ends
    async fn close(&self);
}
