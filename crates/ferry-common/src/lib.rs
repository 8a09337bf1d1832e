//! ferry common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces used by every ferry workspace member:
//!
//! - **Error Handling**: the [`FerryError`] taxonomy and [`Result`] alias
//! - **Fingerprints**: deterministic content identifiers for cache artifacts and
//!   destination keys
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use ferry_common::{Fingerprint, Result};
//!
//! fn cache_name(post: &serde_json::Value) -> Result<String> {
//!     let fp = Fingerprint::of(post)?;
//!     Ok(format!("posts/post-{fp}.json"))
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;

pub use error::{FerryError, Result};
pub use fingerprint::{content_digest, fingerprint_of, Fingerprint};
