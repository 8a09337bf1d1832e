//! Destination store interface
//!
//! A destination holds named collections of JSON records addressed by key.
//! Document collections hold plain records; edge collections hold records that
//! also carry `from`/`to` endpoint keys. Writes are upserts, so publishing the
//! same `(collection, key)` twice leaves one record holding the latest body.
//!
//! Adapters:
//! - [`MemoryDestination`]: in-process, for tests and dry runs
//! - [`PostgresDestination`]: one table per collection

pub mod memory;
pub mod postgres;

pub use memory::MemoryDestination;
pub use postgres::PostgresDestination;

use crate::config::{DestinationConfig, DestinationKind};
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shape of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Document,
    Edge,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Document => "document",
            CollectionKind::Edge => "edge",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document" => Ok(CollectionKind::Document),
            "edge" => Ok(CollectionKind::Edge),
            other => Err(FerryError::validation(format!("Unknown collection kind '{other}'"))),
        }
    }
}

/// Endpoints of an edge record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEnds {
    pub from: String,
    pub to: String,
}

/// One addressable unit in a destination collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub collection: String,
    pub key: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<EdgeEnds>,
}

impl DestinationRecord {
    pub fn document(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data,
            edge: None,
        }
    }

    pub fn edge(
        collection: impl Into<String>,
        key: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data,
            edge: Some(EdgeEnds {
                from: from.into(),
                to: to.into(),
            }),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        match self.edge {
            Some(_) => CollectionKind::Edge,
            None => CollectionKind::Document,
        }
    }

    /// Reject a record whose shape does not match its target collection
    pub fn check_kind(&self, kind: CollectionKind) -> Result<()> {
        if self.key.is_empty() {
            return Err(FerryError::validation(format!(
                "Record in '{}' has an empty key",
                self.collection
            )));
        }
        if self.kind() != kind {
            return Err(FerryError::validation(format!(
                "Record {}/{} is shaped as {} but the collection is {}",
                self.collection,
                self.key,
                self.kind(),
                kind
            )));
        }
        Ok(())
    }
}

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Storage backend that published records land in
///
/// Operations on a collection that does not exist fail with `NotFound`;
/// creating, dropping and existence checks are what
/// [`SchemaManager`](crate::schema::SchemaManager) builds on.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Short adapter name for logs
    fn name(&self) -> &str;

    /// Kind of an existing collection, `None` when absent
    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>>;

    async fn list_collections(&self) -> Result<Vec<(String, CollectionKind)>>;

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn truncate_collection(&self, name: &str) -> Result<()>;

    async fn count(&self, name: &str) -> Result<u64>;

    /// Insert or overwrite by `(collection, key)`
    async fn upsert(&self, record: &DestinationRecord) -> Result<UpsertOutcome>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<DestinationRecord>>;
}

/// Build the configured adapter
pub async fn connect(
    kind: DestinationKind,
    config: &DestinationConfig,
) -> Result<Arc<dyn DestinationStore>> {
    match kind {
        DestinationKind::Memory => Ok(Arc::new(MemoryDestination::new())),
        DestinationKind::Postgres => Ok(Arc::new(PostgresDestination::connect(config).await?)),
    }
}

pub(crate) fn missing_collection(name: &str) -> FerryError {
    FerryError::not_found(format!("collection '{name}'"))
}
