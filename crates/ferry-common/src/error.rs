//! Error types for ferry

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for ferry operations
pub type Result<T> = std::result::Result<T, FerryError>;

/// Main error type for ferry
///
/// Structural errors (`Config`, `SchemaConflict`, `Storage`) are meant to abort a
/// job. Per-record errors (`SourceFetch`, `Publish`, `Validation`) are expected to
/// be caught and logged by the job's hooks so a batch can continue.
#[derive(Error, Debug)]
pub enum FerryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema conflict: collection '{name}' exists as {existing}, requested {requested}")]
    SchemaConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Publish failed for {collection}/{key}: {message}")]
    Publish {
        collection: String,
        key: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl FerryError {
    /// Wrap an I/O error with the path it happened on
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn database(msg: impl std::fmt::Display) -> Self {
        Self::Database(msg.to_string())
    }

    pub fn source_fetch(msg: impl Into<String>) -> Self {
        Self::SourceFetch(msg.into())
    }

    pub fn publish(
        collection: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            collection: collection.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the error only means "nothing there yet"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
