//! Configuration management
//!
//! Process-wide settings come from the environment (optionally seeded from a
//! `.env` file by the binary); per-job settings come from a [`JobConfig`],
//! built in code or loaded from a YAML/JSON file.

use crate::destination::CollectionKind;
use crate::paths::{validate_bucket, PathConfig};
use crate::schema::CollectionSpec;
use ferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Destination Configuration Constants
// ============================================================================

/// Default server URL, without a database name.
pub const DEFAULT_DB_URL: &str = "postgres://localhost:5432";

/// Default database name.
pub const DEFAULT_DB_NAME: &str = "ferry";

/// Default administrative user.
pub const DEFAULT_DB_USER: &str = "postgres";

/// Default maximum connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Job name used when none is given.
pub const DEFAULT_JOB_NAME: &str = "file-import";

/// Which destination adapter to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// In-process store, discarded at exit
    #[default]
    Memory,
    Postgres,
}

/// Destination connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DB_URL.to_string(),
            database: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DestinationConfig {
    /// Read `FERRY_DB_*` variables over the defaults
    pub fn from_env() -> Result<Self> {
        let config = Self {
            url: env_or("FERRY_DB_URL", DEFAULT_DB_URL),
            database: env_or("FERRY_DB_NAME", DEFAULT_DB_NAME),
            username: env_or("FERRY_DB_USER", DEFAULT_DB_USER),
            password: env_or("FERRY_DB_PASSWORD", ""),
            max_connections: env_parse("FERRY_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            connect_timeout_secs: env_parse(
                "FERRY_DB_CONNECT_TIMEOUT",
                DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(FerryError::config("Destination URL cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(FerryError::config("Destination database name cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(FerryError::config("FERRY_DB_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }
}

impl PathConfig {
    /// Read `FERRY_BASE_DIR` and the per-role overrides
    pub fn from_env() -> Self {
        let dir = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from);
        Self {
            base_dir: dir("FERRY_BASE_DIR"),
            input_dir: dir("FERRY_INPUT_DIR"),
            cache_dir: dir("FERRY_CACHE_DIR"),
            output_dir: dir("FERRY_OUTPUT_DIR"),
        }
    }
}

/// Everything one import job needs besides its hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// Storage namespace; defaults to the job name
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub paths: PathConfig,

    /// Document collections owned by the job
    #[serde(default)]
    pub collections: Vec<String>,

    /// Edge collections owned by the job
    #[serde(default)]
    pub relationships: Vec<String>,

    /// Free-form options read by the job's hooks
    #[serde(default)]
    pub options: Value,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bucket: None,
            paths: PathConfig::default(),
            collections: Vec::new(),
            relationships: Vec::new(),
            options: Value::Null,
        }
    }

    /// Load a job definition from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FerryError::storage(path, e))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => serde_yaml::from_str(&text).map_err(|e| FerryError::Yaml(e.to_string()))?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_paths(mut self, paths: PathConfig) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>) -> Self {
        self.relationships.push(name.into());
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn bucket(&self) -> &str {
        self.bucket.as_deref().unwrap_or(&self.name)
    }

    /// Collections declared here, documents first
    pub fn collection_specs(&self) -> Vec<CollectionSpec> {
        self.collections
            .iter()
            .map(|name| CollectionSpec::new(name.clone(), CollectionKind::Document))
            .chain(
                self.relationships
                    .iter()
                    .map(|name| CollectionSpec::new(name.clone(), CollectionKind::Edge)),
            )
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FerryError::config("Job name cannot be empty"));
        }
        validate_bucket(self.bucket())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| FerryError::config(format!("{key}='{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}
