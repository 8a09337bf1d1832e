//! Built-in jobs
//!
//! Jobs are [`ImportHooks`](crate::lifecycle::ImportHooks) implementations.
//! Source-specific jobs live with their collaborators; the ones here only need
//! the filesystem.

pub mod file_import;

pub use file_import::{FileArtifact, FileImportJob, FileImportOptions};
