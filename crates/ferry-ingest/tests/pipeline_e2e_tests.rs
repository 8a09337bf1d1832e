//! End-to-end runs of the file-import job against the in-memory destination

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ferry_ingest::config::JobConfig;
use ferry_ingest::destination::{DestinationStore, MemoryDestination};
use ferry_ingest::jobs::{FileArtifact, FileImportJob};
use ferry_ingest::lifecycle::{ImportJob, JobState, RunOptions};
use ferry_ingest::paths::{PathConfig, StorageRole};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn job_config(base: &Path) -> JobConfig {
    JobConfig::new("blog")
        .with_paths(PathConfig {
            base_dir: Some(base.to_path_buf()),
            ..Default::default()
        })
        .with_options(json!({
            "category": "posts",
            "collection": "posts",
            "key_field": "id",
        }))
}

fn new_job(base: &Path, dest: Arc<MemoryDestination>) -> ImportJob<FileImportJob> {
    let config = job_config(base);
    let hooks = FileImportJob::from_config(&config).unwrap();
    ImportJob::new(config, hooks, dest).unwrap()
}

/// Three posts spread over a JSON array and a JSON-lines file
fn write_sources(base: &Path) {
    let input = base.join("input").join("blog");
    std::fs::create_dir_all(input.join("2024")).unwrap();
    std::fs::write(
        input.join("posts.json"),
        serde_json::to_vec(&json!([
            {"id": 1, "title": "First"},
            {"id": 2, "title": "Second"},
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        input.join("2024").join("more.ndjson"),
        "{\"id\": 3, \"title\": \"Third\"}\n",
    )
    .unwrap();
}

#[tokio::test]
async fn test_three_items_three_artifacts_three_records() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let dest = Arc::new(MemoryDestination::new());

    let mut job = new_job(dir.path(), dest.clone());
    let summary = job.run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.rejected, 0);
    assert_eq!(job.state(), JobState::Done);

    let cached = job.context().store().find_cache("**/*").await.unwrap();
    assert_eq!(cached.len(), 3);
    assert!(cached.iter().all(|p| p.starts_with("posts")));

    let records = dest.records("posts").await.unwrap();
    assert_eq!(records.len(), 3);
    let mut titles: Vec<&str> = records
        .iter()
        .map(|r| r.data["title"].as_str().unwrap())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["First", "Second", "Third"]);
}

#[tokio::test]
async fn test_resume_after_interrupted_run() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let dest = Arc::new(MemoryDestination::new());

    // First process only gets as far as filling the cache
    {
        let mut job = new_job(dir.path(), dest.clone());
        assert_eq!(job.fill_cache().await.unwrap(), 3);
    }

    // Sources disappear; the cache alone must be enough
    std::fs::remove_dir_all(dir.path().join("input")).unwrap();

    let mut job = new_job(dir.path(), dest.clone());
    job.ensure_schema().await.unwrap();
    let summary = job.do_import().await.unwrap();
    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.inserted, 3);
    assert_eq!(dest.count("posts").await.unwrap(), 3);

    // And once more from scratch: same keys, nothing new
    let mut job = new_job(dir.path(), dest.clone());
    let summary = job.run(RunOptions::default()).await.unwrap();
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.inserted, 0);
    assert_eq!(dest.count("posts").await.unwrap(), 3);
    assert_eq!(job.context().store().find_cache("**/*.json").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_refetch_overwrites_by_key() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let dest = Arc::new(MemoryDestination::new());

    let mut job = new_job(dir.path(), dest.clone());
    job.run(RunOptions::default()).await.unwrap();

    // Same ids, new title: artifacts are renamed by key, not duplicated
    let input = dir.path().join("input").join("blog");
    std::fs::write(
        input.join("posts.json"),
        serde_json::to_vec(&json!([
            {"id": 1, "title": "First (edited)"},
            {"id": 2, "title": "Second"},
        ]))
        .unwrap(),
    )
    .unwrap();

    let summary = job
        .run(RunOptions {
            force_fetch: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.updated, 3);
    assert_eq!(job.context().store().find_cache("**/*").await.unwrap().len(), 3);

    let titles: Vec<String> = dest
        .records("posts")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.data["title"].as_str().unwrap().to_string())
        .collect();
    assert!(titles.contains(&"First (edited)".to_string()));
    assert!(!titles.contains(&"First".to_string()));
}

#[tokio::test]
async fn test_malformed_source_skipped_and_counted() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let input = dir.path().join("input").join("blog");
    std::fs::write(input.join("broken.json"), b"{ not json").unwrap();
    std::fs::write(input.join("notes.txt"), b"ignored").unwrap();

    let dest = Arc::new(MemoryDestination::new());
    let mut job = new_job(dir.path(), dest.clone());
    let summary = job.run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(summary.fetched, 3);
    assert_eq!(dest.count("posts").await.unwrap(), 3);
}

#[tokio::test]
async fn test_cached_artifact_shape() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());
    let dest = Arc::new(MemoryDestination::new());

    let mut job = new_job(dir.path(), dest);
    job.fill_cache().await.unwrap();

    let store = job.context().store();
    let first = store.find_cache("posts/*.json").await.unwrap().remove(0);
    let name = first.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("posts-") && name.ends_with(".json"));

    let artifact: FileArtifact = store.read_as(&first, StorageRole::Cache).await.unwrap();
    let FileArtifact::Record {
        source, fingerprint, ..
    } = artifact;
    assert!(source.ends_with(".json") || source.ends_with(".ndjson"));
    assert_eq!(name, format!("posts-{fingerprint}.json"));
}

#[tokio::test]
async fn test_empty_input_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let dest = Arc::new(MemoryDestination::new());

    let mut job = new_job(dir.path(), dest.clone());
    let summary = job.run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.loaded, 0);
    assert_eq!(dest.count("posts").await.unwrap(), 0);
}
