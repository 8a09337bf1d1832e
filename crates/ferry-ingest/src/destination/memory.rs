//! In-process destination

use super::{
    missing_collection, CollectionKind, DestinationRecord, DestinationStore, UpsertOutcome,
};
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

struct Collection {
    kind: CollectionKind,
    records: BTreeMap<String, DestinationRecord>,
}

/// Destination backed by ordered maps behind a lock
#[derive(Default)]
pub struct MemoryDestination {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in a collection, ordered by key
    pub async fn records(&self, name: &str) -> Result<Vec<DestinationRecord>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing_collection(name))?;
        Ok(collection.records.values().cloned().collect())
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    fn name(&self) -> &str {
        "memory"
    }

    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>> {
        Ok(self.collections.read().await.get(name).map(|c| c.kind))
    }

    async fn list_collections(&self) -> Result<Vec<(String, CollectionKind)>> {
        Ok(self
            .collections
            .read()
            .await
            .iter()
            .map(|(name, c)| (name.clone(), c.kind))
            .collect())
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.kind != kind => Err(FerryError::SchemaConflict {
                name: name.to_string(),
                existing: existing.kind.to_string(),
                requested: kind.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        kind,
                        records: BTreeMap::new(),
                    },
                );
                Ok(())
            },
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing_collection(name))
    }

    async fn truncate_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing_collection(name))?;
        collection.records.clear();
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing_collection(name))?;
        Ok(collection.records.len() as u64)
    }

    async fn upsert(&self, record: &DestinationRecord) -> Result<UpsertOutcome> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&record.collection)
            .ok_or_else(|| missing_collection(&record.collection))?;
        record.check_kind(collection.kind)?;

        match collection.records.insert(record.key.clone(), record.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<DestinationRecord>> {
        let collections = self.collections.read().await;
        let found = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;
        Ok(found.records.get(key).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let dest = MemoryDestination::new();
        dest.create_collection("posts", CollectionKind::Document).await.unwrap();

        let first = DestinationRecord::document("posts", "p1", json!({"v": 1}));
        let second = DestinationRecord::document("posts", "p1", json!({"v": 2}));

        assert_eq!(dest.upsert(&first).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(dest.upsert(&second).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(dest.count("posts").await.unwrap(), 1);
        assert_eq!(dest.get("posts", "p1").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let dest = MemoryDestination::new();
        let record = DestinationRecord::document("posts", "p1", json!({}));

        assert!(dest.upsert(&record).await.unwrap_err().is_not_found());
        assert!(dest.count("posts").await.unwrap_err().is_not_found());
        assert!(dest.truncate_collection("posts").await.unwrap_err().is_not_found());
        assert!(dest.drop_collection("posts").await.unwrap_err().is_not_found());
        assert_eq!(dest.collection_kind("posts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_edge_shape_enforced() {
        let dest = MemoryDestination::new();
        dest.create_collection("replies", CollectionKind::Edge).await.unwrap();

        let doc = DestinationRecord::document("replies", "r1", json!({}));
        assert!(matches!(dest.upsert(&doc).await, Err(FerryError::Validation(_))));

        let edge = DestinationRecord::edge("replies", "r1", "p2", "p1", json!({}));
        assert_eq!(dest.upsert(&edge).await.unwrap(), UpsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_create_conflicting_kind() {
        let dest = MemoryDestination::new();
        dest.create_collection("follows", CollectionKind::Document).await.unwrap();
        dest.create_collection("follows", CollectionKind::Document).await.unwrap();

        let err = dest
            .create_collection("follows", CollectionKind::Edge)
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::SchemaConflict { .. }));
    }

    #[tokio::test]
    async fn test_truncate_keeps_collection() {
        let dest = MemoryDestination::new();
        dest.create_collection("posts", CollectionKind::Document).await.unwrap();
        dest.upsert(&DestinationRecord::document("posts", "a", json!(1))).await.unwrap();
        dest.upsert(&DestinationRecord::document("posts", "b", json!(2))).await.unwrap();

        dest.truncate_collection("posts").await.unwrap();
        assert_eq!(dest.count("posts").await.unwrap(), 0);
        assert_eq!(
            dest.collection_kind("posts").await.unwrap(),
            Some(CollectionKind::Document)
        );
    }

    #[tokio::test]
    async fn test_records_ordered_by_key() {
        let dest = MemoryDestination::new();
        dest.create_collection("posts", CollectionKind::Document).await.unwrap();
        for key in ["c", "a", "b"] {
            dest.upsert(&DestinationRecord::document("posts", key, json!({})))
                .await
                .unwrap();
        }
        let keys: Vec<String> = dest
            .records("posts")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
