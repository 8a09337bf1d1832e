//! Collection reconciliation
//!
//! Every operation checks existence before acting, so `ensure` and `destroy`
//! can be repeated safely:
//!
//! ```text
//! Absent --ensure--> Present --destroy--> Absent
//! ```
//!
//! Nothing here ever chains destroy and ensure on its own; wiping a schema is
//! always an explicit caller decision.

use crate::destination::{CollectionKind, DestinationStore};
use ferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A collection a job owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub kind: CollectionKind,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, CollectionKind::Document)
    }

    pub fn edge(name: impl Into<String>) -> Self {
        Self::new(name, CollectionKind::Edge)
    }
}

/// What `ensure` found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

/// Snapshot of one collection for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub kind: CollectionKind,
    /// Kind found in the destination, `None` when absent
    pub present: Option<CollectionKind>,
    pub records: Option<u64>,
}

/// Ensures, destroys and empties destination collections
#[derive(Clone)]
pub struct SchemaManager {
    destination: Arc<dyn DestinationStore>,
}

impl SchemaManager {
    pub fn new(destination: Arc<dyn DestinationStore>) -> Self {
        Self { destination }
    }

    /// Create the collection unless it already exists with the same kind
    pub async fn ensure(&self, name: &str, kind: CollectionKind) -> Result<EnsureOutcome> {
        match self.destination.collection_kind(name).await? {
            Some(existing) if existing == kind => {
                info!(collection = name, kind = %kind, "Collection already present");
                Ok(EnsureOutcome::AlreadyPresent)
            },
            Some(existing) => Err(FerryError::SchemaConflict {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: kind.to_string(),
            }),
            None => {
                self.destination.create_collection(name, kind).await?;
                info!(collection = name, kind = %kind, "Collection created");
                Ok(EnsureOutcome::Created)
            },
        }
    }

    /// Drop the collection; `Ok(false)` when there was nothing to drop
    pub async fn destroy(&self, name: &str) -> Result<bool> {
        if self.destination.collection_kind(name).await?.is_none() {
            info!(collection = name, "Collection did not exist");
            return Ok(false);
        }

        self.destination.drop_collection(name).await?;
        warn!(collection = name, "Collection destroyed");
        Ok(true)
    }

    pub async fn is_empty(&self, name: &str) -> Result<bool> {
        Ok(self.destination.count(name).await? == 0)
    }

    /// Remove every record but keep the collection
    pub async fn truncate(&self, name: &str) -> Result<()> {
        self.destination.truncate_collection(name).await?;
        warn!(collection = name, "Collection truncated");
        Ok(())
    }

    pub async fn ensure_all(&self, specs: &[CollectionSpec]) -> Result<Vec<(String, EnsureOutcome)>> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let outcome = self.ensure(&spec.name, spec.kind).await?;
            outcomes.push((spec.name.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Destroy each collection, returning how many existed
    pub async fn destroy_all(&self, specs: &[CollectionSpec]) -> Result<usize> {
        let mut destroyed = 0;
        for spec in specs {
            if self.destroy(&spec.name).await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    pub async fn status(&self, specs: &[CollectionSpec]) -> Result<Vec<CollectionStatus>> {
        let mut statuses = Vec::with_capacity(specs.len());
        for spec in specs {
            let present = self.destination.collection_kind(&spec.name).await?;
            let records = match present {
                Some(_) => Some(self.destination.count(&spec.name).await?),
                None => None,
            };
            statuses.push(CollectionStatus {
                name: spec.name.clone(),
                kind: spec.kind,
                present,
                records,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::destination::{DestinationRecord, MemoryDestination};
    use serde_json::json;

    fn manager() -> (Arc<MemoryDestination>, SchemaManager) {
        let dest = Arc::new(MemoryDestination::new());
        let schema = SchemaManager::new(dest.clone());
        (dest, schema)
    }

    #[tokio::test]
    async fn test_ensure_twice() {
        let (dest, schema) = manager();

        let first = schema.ensure("posts", CollectionKind::Document).await.unwrap();
        let second = schema.ensure("posts", CollectionKind::Document).await.unwrap();

        assert_eq!(first, EnsureOutcome::Created);
        assert_eq!(second, EnsureOutcome::AlreadyPresent);
        assert_eq!(
            dest.collection_kind("posts").await.unwrap(),
            Some(CollectionKind::Document)
        );
    }

    #[tokio::test]
    async fn test_ensure_kind_conflict() {
        let (_, schema) = manager();
        schema.ensure("follows", CollectionKind::Edge).await.unwrap();

        let err = schema
            .ensure("follows", CollectionKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::SchemaConflict { .. }));
    }

    #[tokio::test]
    async fn test_destroy_absent_is_noop() {
        let (_, schema) = manager();
        assert!(!schema.destroy("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_then_ensure_recreates() {
        let (_, schema) = manager();
        schema.ensure("posts", CollectionKind::Document).await.unwrap();

        assert!(schema.destroy("posts").await.unwrap());
        assert!(!schema.destroy("posts").await.unwrap());
        assert_eq!(
            schema.ensure("posts", CollectionKind::Document).await.unwrap(),
            EnsureOutcome::Created
        );
    }

    #[tokio::test]
    async fn test_truncate_and_is_empty() {
        let (dest, schema) = manager();
        schema.ensure("posts", CollectionKind::Document).await.unwrap();
        assert!(schema.is_empty("posts").await.unwrap());

        dest.upsert(&DestinationRecord::document("posts", "p1", json!({})))
            .await
            .unwrap();
        assert!(!schema.is_empty("posts").await.unwrap());

        schema.truncate("posts").await.unwrap();
        assert!(schema.is_empty("posts").await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_collection_errors() {
        let (_, schema) = manager();
        assert!(schema.is_empty("ghost").await.unwrap_err().is_not_found());
        assert!(schema.truncate("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_ensure_all_and_status() {
        let (_, schema) = manager();
        let specs = vec![CollectionSpec::document("posts"), CollectionSpec::edge("replies")];

        let outcomes = schema.ensure_all(&specs).await.unwrap();
        assert!(outcomes.iter().all(|(_, o)| *o == EnsureOutcome::Created));

        let status = schema.status(&specs).await.unwrap();
        assert_eq!(status[1].present, Some(CollectionKind::Edge));
        assert_eq!(status[1].records, Some(0));

        assert_eq!(schema.destroy_all(&specs).await.unwrap(), 2);
        let status = schema.status(&specs).await.unwrap();
        assert!(status.iter().all(|s| s.present.is_none() && s.records.is_none()));
    }
}
