//! ferry ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! A fetch → cache → publish pipeline for content imports.
//!
//! - **Paths**: [`PathResolver`] maps role-relative paths to input, cache and
//!   output roots, namespaced per job bucket
//! - **Content**: [`ContentStore`] reads and writes those paths, picking the
//!   encoding from the file extension
//! - **Destinations**: [`DestinationStore`] adapters with upsert-by-key writes
//! - **Schema**: [`SchemaManager`] ensures and destroys collections
//! - **Lifecycle**: [`ImportJob`] sequences fill, load, schema and publish
//!   around a job's [`ImportHooks`]
//!
//! # Example
//!
//! ```no_run
//! use ferry_ingest::config::JobConfig;
//! use ferry_ingest::destination::MemoryDestination;
//! use ferry_ingest::jobs::FileImportJob;
//! use ferry_ingest::lifecycle::{ImportJob, RunOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = JobConfig::new("blog");
//!     let hooks = FileImportJob::from_config(&config)?;
//!     let mut job = ImportJob::new(config, hooks, Arc::new(MemoryDestination::new()))?;
//!
//!     let summary = job.run(RunOptions::default()).await?;
//!     println!("published {}", summary.published());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod destination;
pub mod glob;
pub mod jobs;
pub mod lifecycle;
pub mod paths;
pub mod schema;

pub use config::{DestinationConfig, DestinationKind, JobConfig};
pub use content::{Content, ContentStore, Format};
pub use destination::{CollectionKind, DestinationRecord, DestinationStore, UpsertOutcome};
pub use lifecycle::{ImportHooks, ImportJob, ImportSummary, JobContext, JobState, PublishOutcome, RunOptions};
pub use paths::{PathConfig, PathResolver, StorageRole};
pub use schema::{CollectionSpec, EnsureOutcome, SchemaManager};
