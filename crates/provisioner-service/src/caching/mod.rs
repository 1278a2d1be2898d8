//! # Provisioner caching infrastructure
//!
//! Downloaded artifacts are big (a bundled Java runtime is routinely a few
//! hundred megabytes), so every invocation of the tool shares one on-disk
//! cache and repeated runs avoid redundant network transfer.
//!
//! ## Layout
//!
//! The cache lives under a single root directory, by default
//! `<user_home>/cache`. Each artifact is stored at
//! `<root>/<sha256-hex>/<file_name>`: the checksum segment makes the cache
//! content-addressed, so two artifacts with the same file name but different
//! contents never collide, and a corrupted download can never silently
//! overwrite a previously validated copy at a different path.
//!
//! ## Concurrency
//!
//! The concurrency unit is "independent OS process sharing a filesystem
//! directory", not in-process threads. There is no locking; all coordination
//! happens through filesystem operations:
//!
//! - directory creation treats "already exists" as success,
//! - in-flight downloads write to randomly named temporary files that are
//!   exclusively owned by their creating process,
//! - publication is a single atomic move, so no partially written file is
//!   ever visible at a final content-addressed path,
//! - a process that loses a download race validates and reuses the winner's
//!   file instead of treating it as an error.
//!
//! ## [`CacheContents`] / [`CacheError`]
//!
//! Expected failure modes (missing artifact, bad checksum, transport
//! failure) are returned as values so callers can branch on the outcome
//! without `catch`-style control flow. Only contract violations (for example
//! an empty [`ArtifactDescriptor`](crate::types::ArtifactDescriptor) field)
//! panic. Any file that is present but fails checksum validation is deleted
//! eagerly, never left behind to produce a false hit later.

mod cache_error;
mod fs;

pub use cache_error::{CacheContents, CacheError};
pub use fs::{ensure_dir, Cache, CacheStatus};
