use std::time::Duration;

use thiserror::Error;

/// An error that happens while looking up, downloading, or publishing a
/// cached artifact.
///
/// All expected failure modes are represented here and returned as values;
/// the public surface of this crate does not use panics or `?`-propagated
/// I/O errors for conditions a caller is expected to branch on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The artifact was not found at the remote source.
    #[error("not found")]
    NotFound,
    /// The artifact could not be fetched from the remote source due to
    /// missing permissions.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The artifact could not be fetched from the remote source due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The artifact could not be fetched due to another problem, like
    /// connection loss, a 5xx server response, or a local I/O error while
    /// writing the downloaded bytes.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The remote source did not produce a stream at all.
    #[error("download stream is null")]
    NullStream,
    /// The downloaded or cached bytes do not hash to the expected checksum.
    ///
    /// Whenever this is returned, the offending file has already been deleted.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// The cache root or a per-artifact directory could not be created.
    ///
    /// The attached string names the path. This is fatal for the current
    /// attempt: retrying down the same path will fail the same way until the
    /// environment (permissions, disk space) changes.
    #[error("failed to create cache directory `{0}`")]
    CacheDir(String),
    /// An unexpected error in the provisioner itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let caller = std::panic::Location::caller();
        tracing::debug!(
            error = &err as &dyn std::error::Error,
            "I/O error at {caller}"
        );
        Self::DownloadError(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

impl CacheError {
    /// Builds a [`DownloadError`](Self::DownloadError) from the root cause of
    /// an error chain, which usually carries the actionable message.
    pub fn download_error(mut error: &dyn std::error::Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        Self::DownloadError(error.to_string())
    }
}

/// The result of a cache or download operation, containing either `Ok(T)` or
/// the [`CacheError`] describing why the artifact is not usable.
pub type CacheContents<T = ()> = Result<T, CacheError>;
