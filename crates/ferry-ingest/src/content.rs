//! Format-aware file storage over the three storage roles
//!
//! [`ContentStore`] is the only component that touches the filesystem. Paths
//! handed to it are role-relative and go through [`PathResolver`] first; the
//! file extension picks the encoding:
//!
//! | extension          | format      | in memory            |
//! |--------------------|-------------|----------------------|
//! | `.json`            | JSON        | `Content::Structured` |
//! | `.yaml`, `.yml`    | YAML        | `Content::Structured` |
//! | `.ndjson`, `.jsonl`| JSON lines  | `Content::Lines`     |
//! | anything else      | raw         | `Content::Text` / `Content::Bytes` |
//!
//! Each format reads back as the variant it was written from; writing a
//! variant the extension does not hold is a `Validation` error.
//!
//! Writes go to a hidden temporary sibling and are renamed into place, so a
//! reader never observes a half-written artifact under its final name.

use crate::glob::Glob;
use crate::paths::{validate_segment, PathResolver, StorageRole};
use ferry_common::{FerryError, Fingerprint, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// Encoding chosen from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    JsonLines,
    Raw,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("json") => Format::Json,
            Some("yaml" | "yml") => Format::Yaml,
            Some("ndjson" | "jsonl") => Format::JsonLines,
            _ => Format::Raw,
        }
    }

    pub fn is_structured(self) -> bool {
        !matches!(self, Format::Raw)
    }
}

/// Decoded file contents
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A single JSON or YAML document
    Structured(Value),
    /// One value per line
    Lines(Vec<Value>),
    Text(String),
    Bytes(Vec<u8>),
}

impl Content {
    /// View the content as one JSON value; line lists become an array
    pub fn into_structured(self) -> Result<Value> {
        match self {
            Content::Structured(value) => Ok(value),
            Content::Lines(items) => Ok(Value::Array(items)),
            Content::Text(_) | Content::Bytes(_) => Err(FerryError::validation(
                "Raw content has no structured representation",
            )),
        }
    }

    /// Flatten into individual items: arrays and line lists yield their
    /// elements, any other document is a single item
    pub fn into_items(self) -> Result<Vec<Value>> {
        match self.into_structured()? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }

    fn encode(&self, format: Format) -> Result<Vec<u8>> {
        match (format, self) {
            (Format::Json, Content::Structured(value)) => {
                let mut out = serde_json::to_vec_pretty(value)?;
                out.push(b'\n');
                Ok(out)
            },
            (Format::Yaml, Content::Structured(value)) => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| FerryError::Yaml(e.to_string())),
            (Format::JsonLines, Content::Lines(items)) => encode_lines(items),
            (Format::Json | Format::Yaml, Content::Lines(_)) => Err(FerryError::validation(
                "Line lists need a .ndjson or .jsonl extension",
            )),
            (Format::JsonLines, Content::Structured(_)) => Err(FerryError::validation(
                "A single document cannot be written as JSON lines",
            )),
            (Format::Raw, Content::Text(text)) => Ok(text.clone().into_bytes()),
            (Format::Raw, Content::Bytes(bytes)) => Ok(bytes.clone()),
            (Format::Raw, _) => Err(FerryError::validation(
                "Structured content needs a .json, .yaml or .ndjson extension",
            )),
            (_, Content::Text(_) | Content::Bytes(_)) => Err(FerryError::validation(
                "Raw content cannot be written with a structured extension",
            )),
        }
    }

    fn decode(format: Format, bytes: Vec<u8>) -> Result<Self> {
        match format {
            Format::Json => Ok(Content::Structured(serde_json::from_slice(&bytes)?)),
            Format::Yaml => serde_yaml::from_slice(&bytes)
                .map(Content::Structured)
                .map_err(|e| FerryError::Yaml(e.to_string())),
            Format::JsonLines => decode_lines(&bytes),
            Format::Raw => Ok(match String::from_utf8(bytes) {
                Ok(text) => Content::Text(text),
                Err(e) => Content::Bytes(e.into_bytes()),
            }),
        }
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        Content::Structured(value)
    }
}

impl From<Vec<Value>> for Content {
    fn from(items: Vec<Value>) -> Self {
        Content::Lines(items)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Content::Bytes(bytes)
    }
}

fn encode_lines(items: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn decode_lines(bytes: &[u8]) -> Result<Content> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FerryError::validation(format!("JSON lines file is not UTF-8: {e}")))?;

    let mut items = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item = serde_json::from_str(line)
            .map_err(|e| FerryError::validation(format!("Line {}: {e}", idx + 1)))?;
        items.push(item);
    }
    Ok(Content::Lines(items))
}

/// Relative cache location for one artifact: `<category>/<category>-<fp>.<ext>`
pub fn artifact_path(category: &str, fingerprint: &Fingerprint, ext: &str) -> Result<PathBuf> {
    validate_segment("Category", category)?;
    Ok(PathBuf::from(category).join(format!("{category}-{fingerprint}.{ext}")))
}

/// Reads and writes role-relative files
#[derive(Debug, Clone)]
pub struct ContentStore {
    resolver: PathResolver,
}

impl ContentStore {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn resolve(&self, path: impl AsRef<Path>, role: StorageRole) -> PathBuf {
        self.resolver.resolve(path, role)
    }

    pub async fn exists(&self, path: impl AsRef<Path>, role: StorageRole) -> Result<bool> {
        let full = self.resolve(path, role);
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| FerryError::storage(&full, e))
    }

    /// Read and decode a file; a missing file is `Ok(None)`
    pub async fn read(&self, path: impl AsRef<Path>, role: StorageRole) -> Result<Option<Content>> {
        let full = self.resolve(path, role);
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FerryError::storage(&full, e)),
        };

        Content::decode(Format::from_path(&full), bytes).map(Some)
    }

    /// Like [`read`](Self::read) but a missing file is a `NotFound` error
    pub async fn read_strict(&self, path: impl AsRef<Path>, role: StorageRole) -> Result<Content> {
        let path = path.as_ref();
        self.read(path, role)
            .await?
            .ok_or_else(|| FerryError::not_found(format!("{role}:{}", path.display())))
    }

    /// Read a structured file straight into `T`
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
        role: StorageRole,
    ) -> Result<T> {
        let path = path.as_ref();
        let value = self.read_strict(path, role).await?.into_structured()?;
        serde_json::from_value(value)
            .map_err(|e| FerryError::validation(format!("{}: {e}", path.display())))
    }

    /// Encode and write `content`, creating parent directories
    ///
    /// Returns the resolved location.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        role: StorageRole,
        content: impl Into<Content>,
    ) -> Result<PathBuf> {
        let full = self.resolve(path, role);
        let bytes = content.into().encode(Format::from_path(&full))?;
        write_atomic(&full, &bytes).await?;

        tracing::debug!(path = %full.display(), bytes = bytes.len(), "Wrote file");
        Ok(full)
    }

    /// Serialize `value` and write it in the format the extension names
    ///
    /// For JSON lines `value` must serialize to an array, one line per element.
    pub async fn write_value<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        role: StorageRole,
        value: &T,
    ) -> Result<PathBuf> {
        let path = path.as_ref();
        let content = match (Format::from_path(path), serde_json::to_value(value)?) {
            (Format::JsonLines, Value::Array(items)) => Content::Lines(items),
            (_, value) => Content::Structured(value),
        };
        self.write(path, role, content).await
    }

    /// Remove a file; `Ok(false)` if it was not there
    pub async fn delete(&self, path: impl AsRef<Path>, role: StorageRole) -> Result<bool> {
        let full = self.resolve(path, role);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FerryError::storage(&full, e)),
        }
    }

    /// List files under the role root matching `pattern`
    ///
    /// Returned paths are relative to the root and sorted. Hidden entries are
    /// skipped; a root that does not exist yet yields nothing.
    pub async fn find(&self, pattern: &str, role: StorageRole) -> Result<Vec<PathBuf>> {
        let glob = Glob::new(pattern)?;
        let root = self.resolver.root(role).to_path_buf();

        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || walk(&walk_root, &glob))
            .await
            .map_err(|e| FerryError::storage(&root, std::io::Error::other(e)))?
    }

    // ------------------------------------------------------------------------
    // Role shorthands
    // ------------------------------------------------------------------------

    pub async fn read_input(&self, path: impl AsRef<Path>) -> Result<Option<Content>> {
        self.read(path, StorageRole::Input).await
    }

    pub async fn find_input(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.find(pattern, StorageRole::Input).await
    }

    pub async fn read_cache(&self, path: impl AsRef<Path>) -> Result<Option<Content>> {
        self.read(path, StorageRole::Cache).await
    }

    pub async fn write_cache(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Content>,
    ) -> Result<PathBuf> {
        self.write(path, StorageRole::Cache, content).await
    }

    pub async fn exists_cache(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.exists(path, StorageRole::Cache).await
    }

    pub async fn find_cache(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.find(pattern, StorageRole::Cache).await
    }

    pub async fn delete_cache(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.delete(path, StorageRole::Cache).await
    }

    pub async fn write_output(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Content>,
    ) -> Result<PathBuf> {
        self.write(path, StorageRole::Output, content).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FerryError::validation(format!("No file name in {}", path.display())))?;

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FerryError::storage(dir, e))?;
    }

    let tmp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4().simple());
    let tmp = match parent {
        Some(dir) => dir.join(tmp_name),
        None => PathBuf::from(tmp_name),
    };

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| FerryError::storage(&tmp, e))?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(FerryError::storage(path, e));
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}

fn walk(root: &Path, glob: &Glob) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            FerryError::storage(at, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if glob.is_match(&joined) {
            found.push(relative.to_path_buf());
        }
    }

    found.sort();
    Ok(found)
}
