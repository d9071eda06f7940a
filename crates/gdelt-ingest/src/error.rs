//! Ingestion error taxonomy
//!
//! Which variants abort a run and which are absorbed is decided by the caller:
//! the orchestrator treats [`IngestError::Network`] from the catalog and any
//! error from table creation as fatal, and logs everything else at the file
//! or batch scope.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The manifest endpoint could not be reached or answered with an error
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// A single feed file could not be downloaded or verified
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A staged file could not be read as tab-separated records
    #[error("Malformed file {}: {reason}", path.display())]
    FileFormat { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn file_format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
