//! Content fingerprints
//!
//! A fingerprint is a deterministic identifier derived from the *content* of a
//! value. It names cache artifacts and keys destination records, so running the
//! same fetch twice lands on the same file name and the same record key instead
//! of producing duplicates.
//!
//! Derivation:
//!
//! 1. Serialize the value to JSON and re-emit it canonically: object keys sorted
//!    recursively, compact separators. Map iteration order never leaks in.
//! 2. SHA-256 the canonical bytes.
//! 3. Derive a UUIDv5 from the hex digest inside a namespace UUID (itself a v5
//!    of the namespace name), so identical digests in the same namespace always
//!    map to the same identifier.
//!
//! With no value, [`Fingerprint::random`] returns a v4 UUID.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace used by [`Fingerprint::of`]
pub const DEFAULT_NAMESPACE: &str = "ferry";

/// Deterministic content identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
    /// Fingerprint a value in the default namespace
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::namespaced(DEFAULT_NAMESPACE, value)
    }

    /// Fingerprint a value inside a caller-chosen namespace
    ///
    /// Two jobs that want independent key spaces for structurally equal values
    /// use different namespaces.
    pub fn namespaced<T: Serialize + ?Sized>(namespace: &str, value: &T) -> Result<Self> {
        let digest = content_digest(value)?;
        let ns = Uuid::new_v5(&Uuid::NAMESPACE_OID, namespace.as_bytes());
        Ok(Self(Uuid::new_v5(&ns, digest.as_bytes())))
    }

    /// Random, non-reproducible identifier
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

/// Fingerprint an optional value: `Some` is deterministic, `None` is random
pub fn fingerprint_of<T: Serialize + ?Sized>(value: Option<&T>) -> Result<Fingerprint> {
    match value {
        Some(v) => Fingerprint::of(v),
        None => Ok(Fingerprint::random()),
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Fingerprint {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Fingerprint {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Hex SHA-256 of the canonical JSON encoding of `value`
pub fn content_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Canonical JSON bytes: recursively sorted keys, no whitespace
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(val, out)?;
            }
            out.push(b'}');
        },
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        },
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
