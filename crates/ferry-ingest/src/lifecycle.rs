//! Import lifecycle
//!
//! One [`ImportJob`] drives one job through its stages:
//!
//! ```text
//! Idle -> Filling -> Loaded -> SchemaReady -> Publishing -> Done
//!    \________________________________________________/
//!                        |
//!                      Failed
//! ```
//!
//! - **fill**: the job's `fetch` hook talks to its sources and writes cache
//!   artifacts. It is the only stage allowed to touch a source.
//! - **load**: every cache artifact is read back and decoded into the job's
//!   artifact type. An empty cache triggers one fill.
//! - **schema**: the job's collections are ensured in the destination.
//! - **publish**: each artifact is handed to the `publish` hook in cache
//!   listing order.
//!
//! Because artifacts are named by fingerprint and the destination upserts by
//! key, the whole sequence can be re-run after an interruption at any point.

use crate::config::JobConfig;
use crate::content::{artifact_path, Content, ContentStore};
use crate::destination::{DestinationRecord, DestinationStore, UpsertOutcome};
use crate::paths::{PathResolver, StorageRole};
use crate::schema::{CollectionSpec, EnsureOutcome, SchemaManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_common::{FerryError, Fingerprint, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Default glob for cache artifacts
pub const DEFAULT_CACHE_PATTERN: &str = "**/*.json";

/// Where a job is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Filling,
    Loaded,
    SchemaReady,
    Publishing,
    Done,
    Failed,
}

/// What happened to one artifact during publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishOutcome {
    Inserted,
    Updated,
    /// Deliberately not published
    Skipped,
    /// Failed, but the hook chose to carry on with the batch
    Failed,
}

impl From<UpsertOutcome> for PublishOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Inserted => PublishOutcome::Inserted,
            UpsertOutcome::Updated => PublishOutcome::Updated,
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub job: String,
    /// Artifacts written to the cache by fetch
    pub fetched: u64,
    /// Source items fetch could not turn into artifacts
    pub fetch_failed: u64,
    /// Artifacts decoded from the cache
    pub loaded: u64,
    /// Cache files that could not be read or decoded
    pub rejected: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportSummary {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Inserted => self.inserted += 1,
            PublishOutcome::Updated => self.updated += 1,
            PublishOutcome::Skipped => self.skipped += 1,
            PublishOutcome::Failed => self.failed += 1,
        }
    }

    /// Records written to the destination
    pub fn published(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn log(&self) {
        info!(
            job = %self.job,
            fetched = self.fetched,
            fetch_failed = self.fetch_failed,
            loaded = self.loaded,
            rejected = self.rejected,
            inserted = self.inserted,
            updated = self.updated,
            skipped = self.skipped,
            failed = self.failed,
            duration_secs = self.duration_secs,
            "Import summary"
        );
    }
}

/// Switches for [`ImportJob::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Fill the cache even when it already has artifacts
    pub force_fetch: bool,
    /// Destroy the job's collections before ensuring them
    pub reset_schema: bool,
}

/// Everything a hook may touch during a stage
pub struct JobContext {
    name: String,
    store: ContentStore,
    destination: Arc<dyn DestinationStore>,
    options: Value,
    cached: AtomicU64,
    fetch_failed: AtomicU64,
}

impl JobContext {
    pub fn new(
        name: impl Into<String>,
        store: ContentStore,
        destination: Arc<dyn DestinationStore>,
        options: Value,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            destination,
            options,
            cached: AtomicU64::new(0),
            fetch_failed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn destination(&self) -> &Arc<dyn DestinationStore> {
        &self.destination
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    /// Write one artifact to `<category>/<category>-<fingerprint>.json` in the cache
    pub async fn cache_artifact<T: Serialize + ?Sized + Sync>(
        &self,
        category: &str,
        fingerprint: &Fingerprint,
        artifact: &T,
    ) -> Result<PathBuf> {
        let path = artifact_path(category, fingerprint, "json")?;
        self.store.write_value(&path, StorageRole::Cache, artifact).await?;
        self.cached.fetch_add(1, Ordering::Relaxed);

        debug!(job = %self.name, path = %path.display(), "Cached artifact");
        Ok(path)
    }

    /// Count a source item that fetch had to give up on
    pub fn note_fetch_failure(&self) {
        self.fetch_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn upsert(&self, record: &DestinationRecord) -> Result<PublishOutcome> {
        self.destination.upsert(record).await.map(PublishOutcome::from)
    }

    fn take_counts(&self) -> (u64, u64) {
        (
            self.cached.swap(0, Ordering::Relaxed),
            self.fetch_failed.swap(0, Ordering::Relaxed),
        )
    }
}

/// Job-specific behaviour plugged into an [`ImportJob`]
///
/// Every hook has a default, so a job only implements the stages it cares
/// about.
#[async_trait]
pub trait ImportHooks: Send + Sync {
    /// Decoded form of one cache artifact, usually a tagged enum
    type Artifact: DeserializeOwned + Send + Sync;

    /// Collections the job publishes into
    fn collections(&self) -> Vec<CollectionSpec> {
        Vec::new()
    }

    /// Talk to the sources and write cache artifacts
    async fn fetch(&self, ctx: &JobContext) -> Result<()> {
        info!(job = ctx.name(), "No fetch step defined");
        Ok(())
    }

    /// Glob selecting cache artifacts to load
    fn cache_pattern(&self) -> &str {
        DEFAULT_CACHE_PATTERN
    }

    /// Turn one cache file into an artifact
    fn load_artifact(&self, path: &Path, content: Content) -> Result<Self::Artifact> {
        let value = content.into_structured()?;
        serde_json::from_value(value)
            .map_err(|e| FerryError::validation(format!("{}: {e}", path.display())))
    }

    async fn publish(&self, ctx: &JobContext, artifact: &Self::Artifact) -> Result<PublishOutcome> {
        let _ = artifact;
        debug!(job = ctx.name(), "No publish step defined, skipping artifact");
        Ok(PublishOutcome::Skipped)
    }

    /// Release whatever fetch or publish acquired
    async fn teardown(&self, ctx: &JobContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Orchestrates one job
pub struct ImportJob<H: ImportHooks> {
    config: JobConfig,
    hooks: H,
    ctx: JobContext,
    schema: SchemaManager,
    state: JobState,
    summary: ImportSummary,
    filled: bool,
}

impl<H: ImportHooks> ImportJob<H> {
    /// Build a job whose storage roots come from `config.paths` and its bucket
    pub fn new(config: JobConfig, hooks: H, destination: Arc<dyn DestinationStore>) -> Result<Self> {
        config.validate()?;
        let resolver = PathResolver::new(&config.paths, Some(config.bucket()))?;
        Ok(Self::with_store(config, hooks, ContentStore::new(resolver), destination))
    }

    pub fn with_store(
        config: JobConfig,
        hooks: H,
        store: ContentStore,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        let ctx = JobContext::new(
            config.name.clone(),
            store,
            destination.clone(),
            config.options.clone(),
        );
        let summary = ImportSummary::new(config.name.clone());

        Self {
            config,
            hooks,
            ctx,
            schema: SchemaManager::new(destination),
            state: JobState::Idle,
            summary,
            filled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn summary(&self) -> &ImportSummary {
        &self.summary
    }

    /// Configured collections followed by hook-declared ones, first declaration wins
    pub fn collections(&self) -> Vec<CollectionSpec> {
        let mut specs = self.config.collection_specs();
        for spec in self.hooks.collections() {
            if !specs.iter().any(|s| s.name == spec.name) {
                specs.push(spec);
            }
        }
        specs
    }

    /// Run the fetch hook, returning how many artifacts it cached
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn fill_cache(&mut self) -> Result<u64> {
        self.state = JobState::Filling;
        self.filled = true;
        info!("Filling cache");

        let result = self.hooks.fetch(&self.ctx).await;
        let (cached, failed) = self.ctx.take_counts();
        self.summary.fetched += cached;
        self.summary.fetch_failed += failed;

        match result {
            Ok(()) => {
                info!(cached, failed, "Cache filled");
                Ok(cached)
            },
            Err(e) => {
                error!(error = %e, cached, "Fetch failed");
                self.state = JobState::Failed;
                Err(e)
            },
        }
    }

    /// Decode every cache artifact, filling the cache first if it is empty
    ///
    /// Unreadable or undecodable files are logged and counted as rejected.
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn load_cache(&mut self) -> Result<Vec<H::Artifact>> {
        let pattern = self.hooks.cache_pattern().to_string();
        let mut paths = self.find_cached(&pattern).await?;

        if paths.is_empty() {
            if self.filled {
                info!("Cache is empty after fill");
            } else {
                info!("Cache is empty, running fetch");
                self.fill_cache().await?;
                paths = self.find_cached(&pattern).await?;
            }
        }

        let mut artifacts = Vec::with_capacity(paths.len());
        let mut rejected = 0u64;
        for path in &paths {
            match self.load_one(path).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    rejected += 1;
                    warn!(path = %path.display(), error = %e, "Rejected cache artifact");
                },
            }
        }

        self.summary.loaded = artifacts.len() as u64;
        self.summary.rejected = rejected;
        self.state = JobState::Loaded;
        info!(loaded = artifacts.len(), rejected, "Cache loaded");
        Ok(artifacts)
    }

    /// Ensure every collection the job owns
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn ensure_schema(&mut self) -> Result<Vec<(String, EnsureOutcome)>> {
        let specs = self.collections();
        match self.schema.ensure_all(&specs).await {
            Ok(outcomes) => {
                self.state = JobState::SchemaReady;
                Ok(outcomes)
            },
            Err(e) => {
                error!(error = %e, "Schema reconciliation failed");
                self.state = JobState::Failed;
                Err(e)
            },
        }
    }

    /// Drop every collection the job owns; returns how many existed
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn destroy_schema(&mut self) -> Result<usize> {
        let specs = self.collections();
        let destroyed = self.schema.destroy_all(&specs).await?;
        self.state = JobState::Idle;
        Ok(destroyed)
    }

    /// Load the cache and publish every artifact
    ///
    /// The first hook error aborts the batch with a `Publish` error. Records
    /// published before it stay published. The returned summary covers this
    /// call only.
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn do_import(&mut self) -> Result<ImportSummary> {
        self.summary = ImportSummary::new(self.config.name.clone());

        let result = match self.load_cache().await {
            Ok(artifacts) => self.publish_all(&artifacts).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Full run: optional fetch, load, schema, publish, teardown
    #[instrument(skip_all, fields(job = %self.config.name))]
    pub async fn run(&mut self, options: RunOptions) -> Result<ImportSummary> {
        self.summary = ImportSummary::new(self.config.name.clone());
        self.filled = false;
        info!(
            force_fetch = options.force_fetch,
            reset_schema = options.reset_schema,
            "Starting import"
        );

        let staged = self.run_stages(options).await;
        let teardown = self.hooks.teardown(&self.ctx).await;

        let result = match (staged, teardown) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), teardown) => {
                if let Err(te) = teardown {
                    warn!(error = %te, "Teardown failed after an earlier error");
                }
                Err(e)
            },
            (Ok(()), Err(te)) => {
                error!(error = %te, "Teardown failed");
                Err(te)
            },
        };

        self.finish(result)
    }

    fn finish(&mut self, result: Result<()>) -> Result<ImportSummary> {
        self.summary.complete();
        self.summary.log();

        match result {
            Ok(()) => {
                self.state = JobState::Done;
                Ok(self.summary.clone())
            },
            Err(e) => {
                self.state = JobState::Failed;
                Err(e)
            },
        }
    }

    async fn run_stages(&mut self, options: RunOptions) -> Result<()> {
        if options.force_fetch {
            self.fill_cache().await?;
        }

        let artifacts = self.load_cache().await?;

        if options.reset_schema {
            let destroyed = self.destroy_schema().await?;
            warn!(destroyed, "Schema reset requested");
        }
        self.ensure_schema().await?;

        self.publish_all(&artifacts).await
    }

    async fn publish_all(&mut self, artifacts: &[H::Artifact]) -> Result<()> {
        self.state = JobState::Publishing;
        let total = artifacts.len();

        for (idx, artifact) in artifacts.iter().enumerate() {
            match self.hooks.publish(&self.ctx, artifact).await {
                Ok(outcome) => {
                    self.summary.record(outcome);
                    match outcome {
                        PublishOutcome::Inserted | PublishOutcome::Updated => {
                            debug!(item = idx + 1, total, outcome = ?outcome, "Published artifact")
                        },
                        PublishOutcome::Skipped => {
                            info!(item = idx + 1, total, "Skipped artifact")
                        },
                        PublishOutcome::Failed => {
                            warn!(item = idx + 1, total, "Artifact failed, continuing")
                        },
                    }
                },
                Err(e) => {
                    self.summary.failed += 1;
                    self.state = JobState::Failed;
                    error!(item = idx + 1, total, error = %e, "Publish failed, aborting batch");
                    return Err(match e {
                        FerryError::Publish { .. } => e,
                        other => FerryError::publish(
                            format!("job:{}", self.config.name),
                            format!("item-{}", idx + 1),
                            other.to_string(),
                        ),
                    });
                },
            }
        }

        info!(
            published = self.summary.published(),
            skipped = self.summary.skipped,
            failed = self.summary.failed,
            "Publish complete"
        );
        Ok(())
    }

    async fn find_cached(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.ctx.store().find(pattern, StorageRole::Cache).await
    }

    async fn load_one(&self, path: &Path) -> Result<H::Artifact> {
        let content = self.ctx.store().read_strict(path, StorageRole::Cache).await?;
        self.hooks.load_artifact(path, content)
    }
}
