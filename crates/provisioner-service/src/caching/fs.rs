use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::Config;
use crate::types::ArtifactDescriptor;

use super::{CacheContents, CacheError};

/// The result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// The artifact exists at the given path.
    ///
    /// Existence alone is trusted here; a published file was validated before
    /// it became visible, and re-hashing a multi-hundred-megabyte archive on
    /// every lookup would be wasteful. Callers that want the stronger
    /// guarantee validate explicitly via [`checksum::verify_file`](crate::checksum::verify_file).
    Hit(PathBuf),
    /// The artifact is not present; the caller should attempt a download.
    Miss,
}

/// The shared on-disk artifact cache.
///
/// The cache root (`<user_home>/cache`) is shared by all invocations of the
/// tool, including concurrent and unrelated processes on the same machine.
/// Artifacts live at `<root>/<sha256-hex>/<file_name>`; in-flight downloads
/// use randomly named temporary files inside the same per-artifact directory.
///
/// Directories are created lazily and never deleted by this subsystem.
#[derive(Debug, Clone)]
pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_dir: config.cache_dir(),
        }
    }

    /// Creates a cache rooted at the given directory.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Determines whether a copy of the artifact already exists on disk.
    pub fn lookup(&self, artifact: &ArtifactDescriptor) -> CacheContents<CacheStatus> {
        ensure_dir(&self.cache_dir)?;

        let path = self.artifact_path(artifact);
        if path.is_file() {
            tracing::debug!("Cache hit for `{artifact}` at `{}`", path.display());
            Ok(CacheStatus::Hit(path))
        } else {
            tracing::debug!("Cache miss for `{artifact}`");
            Ok(CacheStatus::Miss)
        }
    }

    /// The final content-addressed location of the artifact.
    pub fn artifact_path(&self, artifact: &ArtifactDescriptor) -> PathBuf {
        self.cache_dir
            .join(artifact.checksum())
            .join(artifact.file_name())
    }

    /// Ensures the per-artifact directory (`<root>/<checksum>/`) exists and
    /// returns it.
    pub fn artifact_dir(&self, artifact: &ArtifactDescriptor) -> CacheContents<PathBuf> {
        let dir = self.cache_dir.join(artifact.checksum());
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Creates a new randomly named temporary file inside `dir`.
    ///
    /// The file is exclusively owned by this process until it is either
    /// persisted to its final name or deleted on drop. The `tmp` prefix plus
    /// random suffix keeps it from colliding with a published artifact or
    /// with temporary files of concurrent writers.
    pub fn tempfile_in(&self, dir: &Path) -> CacheContents<NamedTempFile> {
        tempfile::Builder::new()
            .prefix("tmp")
            .tempfile_in(dir)
            .map_err(|e| {
                tracing::debug!(
                    error = &e as &dyn std::error::Error,
                    "Failed to create temporary file in `{}`",
                    dir.display()
                );
                CacheError::CacheDir(dir.display().to_string())
            })
    }
}

/// Ensures `path` exists as a directory, creating it and its parents if needed.
///
/// Concurrent callers racing to create the same directory all succeed: the
/// directory already existing is success, not an error. Actual failures
/// (permissions, disk full) map to [`CacheError::CacheDir`] naming the path.
pub fn ensure_dir(path: &Path) -> CacheContents<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        // Another process may have created it between our check and create.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => {
            tracing::debug!(
                error = &e as &dyn std::error::Error,
                "Failed to create cache directory `{}`",
                path.display()
            );
            Err(CacheError::CacheDir(path.display().to_string()))
        }
    }
}
