//! Bucketed path resolution
//!
//! Every job sees three storage roles: `input` (raw source material), `cache`
//! (normalized artifacts produced by fetching) and `output` (final exports).
//! A role's root is
//!
//! ```text
//! [base_dir/] <role dir> [/bucket]
//! ```
//!
//! where the role dir defaults to the role name and the bucket is the job's
//! namespace. Resolution is pure path algebra: it never touches the filesystem
//! and never fails.

use ferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Logical storage role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageRole {
    Input,
    Cache,
    Output,
}

impl StorageRole {
    pub const ALL: [StorageRole; 3] = [StorageRole::Input, StorageRole::Cache, StorageRole::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageRole::Input => "input",
            StorageRole::Cache => "cache",
            StorageRole::Output => "output",
        }
    }

    fn index(self) -> usize {
        match self {
            StorageRole::Input => 0,
            StorageRole::Cache => 1,
            StorageRole::Output => 2,
        }
    }
}

impl fmt::Display for StorageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageRole {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "input" => Ok(StorageRole::Input),
            "cache" => Ok(StorageRole::Cache),
            "output" => Ok(StorageRole::Output),
            other => Err(FerryError::config(format!(
                "Unknown storage role '{other}' (expected input, cache or output)"
            ))),
        }
    }
}

/// Directory layout shared by every job in a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Parent of every relative role directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl PathConfig {
    fn role_dir(&self, role: StorageRole) -> PathBuf {
        let dir = match role {
            StorageRole::Input => self.input_dir.as_ref(),
            StorageRole::Cache => self.cache_dir.as_ref(),
            StorageRole::Output => self.output_dir.as_ref(),
        };
        dir.cloned().unwrap_or_else(|| PathBuf::from(role.as_str()))
    }
}

/// Resolves role-relative paths to concrete locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    roots: [PathBuf; 3],
    bucket: Option<String>,
}

impl PathResolver {
    /// Compute the three role roots
    ///
    /// A relative role directory nests under `base_dir`; an absolute one is
    /// used as-is. Fails only when the bucket is not filesystem safe.
    pub fn new(config: &PathConfig, bucket: Option<&str>) -> Result<Self> {
        if let Some(name) = bucket {
            validate_bucket(name)?;
        }

        let roots = StorageRole::ALL.map(|role| {
            let dir = config.role_dir(role);
            let root = match &config.base_dir {
                Some(base) => base.join(dir),
                None => dir,
            };
            match bucket {
                Some(name) => root.join(name),
                None => root,
            }
        });

        Ok(Self {
            roots,
            bucket: bucket.map(str::to_string),
        })
    }

    pub fn root(&self, role: StorageRole) -> &Path {
        &self.roots[role.index()]
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Resolve `path` under the root of `role`
    ///
    /// Absolute paths come back unchanged, as do paths that already start with
    /// the role root, so `resolve(resolve(p))` equals `resolve(p)`.
    pub fn resolve(&self, path: impl AsRef<Path>, role: StorageRole) -> PathBuf {
        let path = path.as_ref();
        let root = self.root(role);

        if path.is_absolute() || path.starts_with(root) {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }

    /// Strip the role root back off a resolved path
    pub fn relative_to_root(&self, path: impl AsRef<Path>, role: StorageRole) -> Option<PathBuf> {
        path.as_ref()
            .strip_prefix(self.root(role))
            .ok()
            .map(Path::to_path_buf)
    }
}

/// Buckets become directory names, so only a conservative alphabet is allowed
pub fn validate_bucket(name: &str) -> Result<()> {
    validate_segment("Bucket", name)
}

/// Check that `name` can be used as a single path segment
pub(crate) fn validate_segment(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if first_ok && rest_ok {
        Ok(())
    } else {
        Err(FerryError::config(format!(
            "{kind} '{name}' is not filesystem safe (use letters, digits, '.', '_' or '-', starting with a letter or digit)"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver(base: Option<&str>, bucket: Option<&str>) -> PathResolver {
        let config = PathConfig {
            base_dir: base.map(PathBuf::from),
            ..Default::default()
        };
        PathResolver::new(&config, bucket).unwrap()
    }

    #[test]
    fn test_bare_roots() {
        let r = resolver(None, None);
        assert_eq!(r.root(StorageRole::Input), Path::new("input"));
        assert_eq!(r.root(StorageRole::Cache), Path::new("cache"));
        assert_eq!(r.root(StorageRole::Output), Path::new("output"));
    }

    #[test]
    fn test_base_and_bucket() {
        let r = resolver(Some("/data"), Some("blog"));
        assert_eq!(
            r.resolve("posts/post-1.json", StorageRole::Cache),
            PathBuf::from("/data/cache/blog/posts/post-1.json")
        );
        assert_eq!(r.root(StorageRole::Output), Path::new("/data/output/blog"));
    }

    #[test]
    fn test_absolute_path_unchanged() {
        let r = resolver(Some("/data"), Some("blog"));
        let abs = PathBuf::from("/mnt/exports/dump.sql");
        assert_eq!(r.resolve(&abs, StorageRole::Input), abs);
    }

    #[test]
    fn test_no_double_prefix_relative_root() {
        let r = resolver(None, Some("blog"));
        let once = r.resolve("posts/a.json", StorageRole::Cache);
        assert_eq!(once, PathBuf::from("cache/blog/posts/a.json"));
        assert_eq!(r.resolve(&once, StorageRole::Cache), once);
    }

    #[test]
    fn test_prefix_match_is_component_wise() {
        // "cache/blogger" must not be mistaken for a path under "cache/blog"
        let r = resolver(None, Some("blog"));
        assert_eq!(
            r.resolve("cache/blogger/x.json", StorageRole::Cache),
            PathBuf::from("cache/blog/cache/blogger/x.json")
        );
    }

    #[test]
    fn test_role_overrides() {
        let config = PathConfig {
            base_dir: Some(PathBuf::from("/data")),
            cache_dir: Some(PathBuf::from("normalized")),
            output_dir: Some(PathBuf::from("/srv/out")),
            ..Default::default()
        };
        let r = PathResolver::new(&config, Some("forum")).unwrap();
        assert_eq!(r.root(StorageRole::Input), Path::new("/data/input/forum"));
        assert_eq!(r.root(StorageRole::Cache), Path::new("/data/normalized/forum"));
        assert_eq!(r.root(StorageRole::Output), Path::new("/srv/out/forum"));
    }

    #[test]
    fn test_relative_to_root() {
        let r = resolver(Some("/data"), Some("blog"));
        let full = r.resolve("posts/a.json", StorageRole::Cache);
        assert_eq!(
            r.relative_to_root(&full, StorageRole::Cache),
            Some(PathBuf::from("posts/a.json"))
        );
        assert_eq!(r.relative_to_root("/elsewhere/a.json", StorageRole::Cache), None);
    }

    #[test]
    fn test_bucket_validation() {
        assert!(validate_bucket("blog-2024_v1.0").is_ok());
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket("..").is_err());
        assert!(validate_bucket("a/b").is_err());
        assert!(validate_bucket("-leading").is_err());
        assert!(PathResolver::new(&PathConfig::default(), Some("bad name")).is_err());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Cache".parse::<StorageRole>().unwrap(), StorageRole::Cache);
        assert!("scratch".parse::<StorageRole>().is_err());
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(
            segments in proptest::collection::vec("[a-z0-9_-]{1,8}", 1..5),
            base in proptest::option::of(Just("/srv/ferry")),
            bucket in proptest::option::of("[a-z]{1,6}"),
        ) {
            let r = resolver(base, bucket.as_deref());
            let rel: PathBuf = segments.iter().collect();
            for role in StorageRole::ALL {
                let once = r.resolve(&rel, role);
                prop_assert_eq!(r.resolve(&once, role), once.clone());
                prop_assert!(once.starts_with(r.root(role)));
            }
        }
    }
}
