//! GDELT Ingest Library
//!
//! Incremental, idempotent loading of the GDELT 2.0 feed (events, mentions
//! and Global Knowledge Graph files) into PostgreSQL.
//!
//! # Pipeline
//!
//! - **catalog**: master file list download and watermark filtering
//! - **record_type**: URL classification into events / mentions / gkg
//! - **fetcher**: resumable, checksum-verified downloads with retry
//! - **loader**: bounded-memory batch loading with per-batch transactions
//! - **watermark**: latest ingested timestamp across all tables
//! - **orchestrator**: one full pass with a bounded worker pool
//!
//! # Example
//!
//! ```no_run
//! use gdelt_ingest::{config::IngestConfig, orchestrator::Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     config.validate()?;
//!     let orchestrator = Orchestrator::from_config(&config).await?;
//!     let summary = orchestrator.run(CancellationToken::new()).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod orchestrator;
pub mod record_type;
pub mod schema;
pub mod store;
pub mod summary;
pub mod watermark;

pub use error::{IngestError, Result};
pub use record_type::RecordType;
pub use summary::RunSummary;
