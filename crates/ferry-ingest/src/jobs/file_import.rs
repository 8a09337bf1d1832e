//! Import structured files from the input role
//!
//! Every input file matching `pattern` is read (`.json` documents or arrays,
//! `.ndjson`/`.jsonl` lists, `.yaml`), split into items, and each item becomes
//! one cache artifact keyed by its fingerprint. Publishing upserts the items
//! into a single document collection under the same key, so re-importing the
//! same files only ever updates.

use crate::config::JobConfig;
use crate::content::Format;
use crate::destination::DestinationRecord;
use crate::lifecycle::{ImportHooks, JobContext, PublishOutcome};
use crate::paths::{validate_segment, StorageRole};
use crate::schema::CollectionSpec;
use async_trait::async_trait;
use ferry_common::fingerprint::DEFAULT_NAMESPACE;
use ferry_common::{FerryError, Fingerprint, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Options read from the job's `options` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileImportOptions {
    /// Glob over the input role
    pub pattern: String,
    /// Cache directory and file prefix for artifacts
    pub category: String,
    /// Destination collection
    pub collection: String,
    /// Item field whose value identifies the item; the whole item otherwise
    pub key_field: Option<String>,
    /// Fingerprint namespace
    pub namespace: Option<String>,
}

impl Default for FileImportOptions {
    fn default() -> Self {
        Self {
            pattern: "**/*".to_string(),
            category: "records".to_string(),
            collection: "records".to_string(),
            key_field: None,
            namespace: None,
        }
    }
}

/// One imported item as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FileArtifact {
    Record {
        /// Input-relative path the item came from
        source: String,
        fingerprint: Fingerprint,
        data: Value,
    },
}

/// Hooks for importing files dropped into the input role
#[derive(Debug, Clone)]
pub struct FileImportJob {
    options: FileImportOptions,
    cache_pattern: String,
}

impl FileImportJob {
    pub fn new(options: FileImportOptions) -> Result<Self> {
        validate_segment("Category", &options.category)?;
        if options.collection.is_empty() {
            return Err(FerryError::config("file-import needs a collection name"));
        }

        let cache_pattern = format!("{}/*.json", options.category);
        Ok(Self {
            options,
            cache_pattern,
        })
    }

    /// Read options from `config.options`, defaults where absent
    pub fn from_config(config: &JobConfig) -> Result<Self> {
        let options = if config.options.is_null() {
            FileImportOptions::default()
        } else {
            serde_json::from_value(config.options.clone()).map_err(|e| {
                FerryError::config(format!("Invalid options for job '{}': {e}", config.name))
            })?
        };
        Self::new(options)
    }

    pub fn options(&self) -> &FileImportOptions {
        &self.options
    }

    /// Identity of one item
    pub fn fingerprint(&self, item: &Value) -> Result<Fingerprint> {
        let namespace = self.options.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let key = self
            .options
            .key_field
            .as_deref()
            .and_then(|field| item.get(field))
            .filter(|v| !v.is_null());

        match key {
            Some(key) => Fingerprint::namespaced(namespace, key),
            None => Fingerprint::namespaced(namespace, item),
        }
    }

    async fn read_items(&self, ctx: &JobContext, source: &Path) -> Result<Vec<Value>> {
        ctx.store()
            .read_strict(source, StorageRole::Input)
            .await?
            .into_items()
    }
}

#[async_trait]
impl ImportHooks for FileImportJob {
    type Artifact = FileArtifact;

    fn collections(&self) -> Vec<CollectionSpec> {
        vec![CollectionSpec::document(self.options.collection.clone())]
    }

    async fn fetch(&self, ctx: &JobContext) -> Result<()> {
        let sources = ctx.store().find_input(&self.options.pattern).await?;
        if sources.is_empty() {
            warn!(
                pattern = %self.options.pattern,
                root = %ctx.store().resolver().root(StorageRole::Input).display(),
                "No input files matched"
            );
            return Ok(());
        }

        for source in &sources {
            if !Format::from_path(source).is_structured() {
                debug!(source = %source.display(), "Skipping file without a structured extension");
                continue;
            }

            let items = match self.read_items(ctx, source).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "Skipping unreadable input file");
                    ctx.note_fetch_failure();
                    continue;
                },
            };

            let count = items.len();
            for data in items {
                let fingerprint = self.fingerprint(&data)?;
                let artifact = FileArtifact::Record {
                    source: source.display().to_string(),
                    fingerprint,
                    data,
                };
                ctx.cache_artifact(&self.options.category, &fingerprint, &artifact)
                    .await?;
            }

            info!(source = %source.display(), items = count, "Cached input file");
        }
        Ok(())
    }

    fn cache_pattern(&self) -> &str {
        &self.cache_pattern
    }

    async fn publish(&self, ctx: &JobContext, artifact: &FileArtifact) -> Result<PublishOutcome> {
        let FileArtifact::Record {
            fingerprint, data, ..
        } = artifact;

        let record = DestinationRecord::document(
            self.options.collection.clone(),
            fingerprint.to_string(),
            data.clone(),
        );
        match ctx.upsert(&record).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    collection = %record.collection,
                    key = %record.key,
                    error = %e,
                    "Failed to publish record"
                );
                Ok(PublishOutcome::Failed)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::ContentStore;
    use crate::destination::{CollectionKind, DestinationStore, MemoryDestination};
    use crate::paths::{PathConfig, PathResolver};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job_with_key(field: Option<&str>) -> FileImportJob {
        FileImportJob::new(FileImportOptions {
            key_field: field.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_key_field_fingerprint() {
        let job = job_with_key(Some("id"));
        let a = job.fingerprint(&json!({"id": 7, "title": "old"})).unwrap();
        let b = job.fingerprint(&json!({"id": 7, "title": "new"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_whole_item_fingerprint() {
        let job = job_with_key(None);
        let a = job.fingerprint(&json!({"id": 7, "title": "old"})).unwrap();
        let b = job.fingerprint(&json!({"id": 7, "title": "new"})).unwrap();
        assert_ne!(a, b);

        // missing or null key falls back to the whole item
        let keyed = job_with_key(Some("id"));
        assert_eq!(
            keyed.fingerprint(&json!({"id": null, "x": 1})).unwrap(),
            job.fingerprint(&json!({"id": null, "x": 1})).unwrap()
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = JobConfig::new("blog").with_options(json!({
            "pattern": "posts/*.json",
            "collection": "posts",
        }));
        let job = FileImportJob::from_config(&config).unwrap();
        assert_eq!(job.options().pattern, "posts/*.json");
        assert_eq!(job.options().collection, "posts");
        assert_eq!(job.options().category, "records");
        assert_eq!(job.cache_pattern(), "records/*.json");
    }

    #[test]
    fn test_bad_options() {
        let bad_category = FileImportOptions {
            category: "../up".to_string(),
            ..Default::default()
        };
        assert!(FileImportJob::new(bad_category).is_err());

        let config = JobConfig::new("blog").with_options(json!({"pattern": 5}));
        assert!(matches!(
            FileImportJob::from_config(&config),
            Err(FerryError::Config(_))
        ));
    }

    #[test]
    fn test_artifact_tagged_by_category() {
        let artifact = FileArtifact::Record {
            source: "a.json".to_string(),
            fingerprint: Fingerprint::of(&1).unwrap(),
            data: json!({"k": 1}),
        };
        let encoded = serde_json::to_value(&artifact).unwrap();
        assert_eq!(encoded["category"], "record");
        assert_eq!(serde_json::from_value::<FileArtifact>(encoded).unwrap(), artifact);
    }

    #[test]
    fn test_declares_document_collection() {
        let job = job_with_key(None);
        assert_eq!(job.collections(), vec![CollectionSpec::document("records")]);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let paths = PathConfig {
            base_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = ContentStore::new(PathResolver::new(&paths, Some("blog")).unwrap());
        let dest = Arc::new(MemoryDestination::new());
        let ctx = JobContext::new("blog", store, dest.clone(), Value::Null);

        let job = job_with_key(None);
        let data = json!({"k": 1});
        let artifact = FileArtifact::Record {
            source: "a.json".to_string(),
            fingerprint: job.fingerprint(&data).unwrap(),
            data,
        };

        // No collection yet: the upsert fails, the hook carries on
        assert_eq!(
            job.publish(&ctx, &artifact).await.unwrap(),
            PublishOutcome::Failed
        );

        dest.create_collection("records", CollectionKind::Document)
            .await
            .unwrap();
        assert_eq!(
            job.publish(&ctx, &artifact).await.unwrap(),
            PublishOutcome::Inserted
        );
    }
}
