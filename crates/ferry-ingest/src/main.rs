//! ferry-ingest - run content import jobs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferry_common::logging::{init_logging, LogConfig, LogLevel};
use ferry_common::Fingerprint;
use ferry_ingest::config::{DestinationConfig, DestinationKind, JobConfig, DEFAULT_JOB_NAME};
use ferry_ingest::destination;
use ferry_ingest::jobs::FileImportJob;
use ferry_ingest::lifecycle::{ImportHooks, ImportJob, RunOptions};
use ferry_ingest::paths::{PathConfig, PathResolver, StorageRole};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ferry-ingest")]
#[command(author, version, about = "Fetch, cache and publish content imports")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Job definition (YAML or JSON)
    #[arg(short, long, global = true, env = "FERRY_JOB_CONFIG")]
    config: Option<PathBuf>,

    /// Job name when no definition file is given
    #[arg(long, global = true, default_value = DEFAULT_JOB_NAME)]
    job: String,

    /// Storage bucket (defaults to the job name)
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Destination adapter
    #[arg(long, global = true, value_enum, env = "FERRY_DESTINATION", default_value_t = DestinationKind::Memory)]
    destination: DestinationKind,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch when the cache is empty (or forced), then publish everything
    Run {
        /// Fetch even if the cache already has artifacts
        #[arg(long)]
        force_fetch: bool,

        /// Destroy the job's collections before recreating them
        #[arg(long)]
        reset_schema: bool,
    },

    /// Run only the fetch stage
    Fill,

    /// Ensure the schema and publish what is cached
    Publish,

    /// Manage the job's destination collections
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Inspect the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print where a path resolves to
    Resolve {
        path: PathBuf,

        #[arg(long, default_value = "cache")]
        role: StorageRole,
    },

    /// Print the fingerprint of a JSON value (plain strings are accepted too)
    Fingerprint {
        value: String,

        #[arg(long)]
        namespace: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SchemaAction {
    Ensure,
    /// Drop every collection the job owns
    Destroy,
    /// Empty every collection the job owns
    Truncate,
    Status,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List cached artifacts
    List {
        /// Glob over the cache root (defaults to the job's artifact pattern)
        #[arg(long)]
        pattern: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ferry-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let job_config = load_job_config(&cli)?;

    match cli.command {
        Command::Resolve { path, role } => {
            let resolver = PathResolver::new(&job_config.paths, Some(job_config.bucket()))?;
            println!("{}", resolver.resolve(&path, role).display());
        },
        Command::Fingerprint { value, namespace } => {
            let parsed = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value));
            let fp = match namespace {
                Some(ns) => Fingerprint::namespaced(&ns, &parsed)?,
                None => Fingerprint::of(&parsed)?,
            };
            println!("{fp}");
        },
        Command::Run {
            force_fetch,
            reset_schema,
        } => {
            let mut job = build_job(cli.destination, job_config).await?;
            job.run(RunOptions {
                force_fetch,
                reset_schema,
            })
            .await
            .context("Import failed")?;
        },
        Command::Fill => {
            let mut job = build_job(cli.destination, job_config).await?;
            let cached = job.fill_cache().await.context("Fetch failed")?;
            println!("cached {cached} artifacts");
        },
        Command::Publish => {
            let mut job = build_job(cli.destination, job_config).await?;
            job.ensure_schema().await?;
            let mut summary = job.do_import().await.context("Publish failed")?;
            summary.complete();
            summary.log();
        },
        Command::Schema { action } => {
            let mut job = build_job(cli.destination, job_config).await?;
            schema_command(&mut job, action).await?;
        },
        Command::Cache {
            action: CacheAction::List { pattern },
        } => {
            let job = build_job(cli.destination, job_config).await?;
            let pattern = pattern.unwrap_or_else(|| job.hooks().cache_pattern().to_string());
            for path in job.context().store().find(&pattern, StorageRole::Cache).await? {
                println!("{}", path.display());
            }
        },
    }

    Ok(())
}

fn load_job_config(cli: &Cli) -> Result<JobConfig> {
    let mut config = match &cli.config {
        Some(path) => JobConfig::from_file(path)
            .with_context(|| format!("Failed to load job definition {}", path.display()))?,
        None => JobConfig::new(cli.job.clone()),
    };

    if let Some(bucket) = &cli.bucket {
        config.bucket = Some(bucket.clone());
    }
    if config.paths == PathConfig::default() {
        config.paths = PathConfig::from_env();
    }

    config.validate()?;
    Ok(config)
}

async fn build_job(kind: DestinationKind, config: JobConfig) -> Result<ImportJob<FileImportJob>> {
    let destination_config = match kind {
        DestinationKind::Memory => DestinationConfig::default(),
        DestinationKind::Postgres => DestinationConfig::from_env()?,
    };
    let destination = destination::connect(kind, &destination_config)
        .await
        .context("Failed to connect to destination")?;

    info!(job = %config.name, bucket = config.bucket(), destination = destination.name(), "Job ready");

    let hooks = FileImportJob::from_config(&config)?;
    Ok(ImportJob::new(config, hooks, destination)?)
}

async fn schema_command<H: ImportHooks>(job: &mut ImportJob<H>, action: SchemaAction) -> Result<()> {
    match action {
        SchemaAction::Ensure => {
            for (name, outcome) in job.ensure_schema().await? {
                println!("{name}: {outcome:?}");
            }
        },
        SchemaAction::Destroy => {
            let destroyed = job.destroy_schema().await?;
            println!("destroyed {destroyed} collections");
        },
        SchemaAction::Truncate => {
            for spec in job.collections() {
                job.schema().truncate(&spec.name).await?;
                println!("{}: truncated", spec.name);
            }
        },
        SchemaAction::Status => {
            for status in job.schema().status(&job.collections()).await? {
                let state = match (status.present, status.records) {
                    (Some(kind), Some(records)) => format!("present ({kind}, {records} records)"),
                    _ => "absent".to_string(),
                };
                println!("{} [{}]: {state}", status.name, status.kind);
            }
        },
    }
    Ok(())
}
