//! Service which downloads artifacts into the shared cache.
//!
//! The orchestration here is what makes the cache safe to share between
//! independent processes: downloads go to a randomly named temporary file
//! first, are checksum-validated, and only then atomically moved to their
//! final content-addressed location. Two processes racing to populate the
//! same artifact both succeed; the loser detects the winner's output and
//! validates it instead of treating it as an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::Future;
use futures::stream::BoxStream;
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::caching::{Cache, CacheContents, CacheError};
use crate::checksum::verify_file;
use crate::types::ArtifactDescriptor;
use crate::utils::http::DownloadTimeouts;

mod http;

pub use self::http::HttpArtifactSource;

const USER_AGENT: &str = concat!("provisioner/", env!("CARGO_PKG_VERSION"));

/// The number of full download attempts before giving up.
///
/// The recovery path assumes a concurrent writer produces a valid file. If it
/// produced a corrupt one instead, the file is deleted and one more attempt
/// re-downloads from scratch; persistent corruption then surfaces as
/// [`CacheError::ChecksumMismatch`].
const MAX_DOWNLOAD_ATTEMPTS: usize = 2;

/// A stream of byte chunks coming from a remote source.
pub type ByteStream = BoxStream<'static, CacheContents<Bytes>>;

/// A deferred producer of the remote byte stream for one artifact.
///
/// Nothing is fetched until [`open_stream`](Self::open_stream) is invoked, so
/// a provider can be constructed unconditionally and only hit the network on
/// a cache miss. Returning `Ok(None)` signals that the server did not produce
/// a stream at all.
pub trait StreamProvider: Sync {
    fn open_stream(&self) -> impl Future<Output = CacheContents<Option<ByteStream>>> + Send;
}

/// A service which downloads artifacts and publishes them into a [`Cache`].
#[derive(Debug)]
pub struct DownloadService {
    cache: Cache,
    timeouts: DownloadTimeouts,
}

impl DownloadService {
    pub fn new(cache: Cache, timeouts: DownloadTimeouts) -> Arc<Self> {
        Arc::new(Self { cache, timeouts })
    }

    /// Downloads the artifact and publishes it at its final cache location.
    ///
    /// If a valid copy already exists on disk this returns it without
    /// touching the network, making the operation idempotent. On success the
    /// returned path points at the published, checksum-validated file; the
    /// file at that path is never mutated afterwards.
    pub async fn download(
        &self,
        artifact: &ArtifactDescriptor,
        source: &impl StreamProvider,
    ) -> CacheContents<PathBuf> {
        let dir = self.cache.artifact_dir(artifact)?;
        let target = self.cache.artifact_path(artifact);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_download(artifact, &dir, &target, source).await {
                Ok(path) => {
                    tracing::debug!("Artifact `{artifact}` available at `{}`", path.display());
                    break Ok(path);
                }
                Err(err) if attempts < MAX_DOWNLOAD_ATTEMPTS => {
                    tracing::debug!("Download attempt {attempts} for `{artifact}` failed: {err}");
                }
                Err(err) => {
                    tracing::debug!("Artifact `{artifact}` failed after {attempts} attempts: {err}");
                    break Err(err);
                }
            }
        }
    }

    /// One pass through the download state machine.
    async fn try_download(
        &self,
        artifact: &ArtifactDescriptor,
        dir: &Path,
        target: &Path,
        source: &impl StreamProvider,
    ) -> CacheContents<PathBuf> {
        // A previous run or a concurrent process may have published the
        // artifact already.
        if target.exists() {
            if verify_file(target, artifact.checksum()) {
                return Ok(target.to_owned());
            }
            tracing::debug!("Deleting corrupt cached file `{}`", target.display());
            std::fs::remove_file(target)?;
        }

        let temp_file = match self.fetch(dir, source).await {
            Ok(temp_file) => temp_file,
            Err(err) => {
                // The one recovery check: another process may have won the
                // race and published the artifact while our download failed.
                if target.exists() {
                    if verify_file(target, artifact.checksum()) {
                        tracing::debug!(
                            "Using `{}` published by a concurrent process",
                            target.display()
                        );
                        return Ok(target.to_owned());
                    }
                    let _ = std::fs::remove_file(target);
                    return Err(CacheError::ChecksumMismatch);
                }
                return Err(err);
            }
        };

        if !verify_file(temp_file.path(), artifact.checksum()) {
            // Dropping the temp file deletes it.
            return Err(CacheError::ChecksumMismatch);
        }

        // Atomic publish. The file only ever becomes visible at its final
        // path fully written and validated.
        match temp_file.persist_noclobber(target) {
            Ok(_) => Ok(target.to_owned()),
            Err(err) => {
                // The final file appeared while we were downloading. That is
                // acceptable as long as the winner's copy validates; our own
                // copy is discarded either way.
                if verify_file(target, artifact.checksum()) {
                    tracing::debug!(
                        "Lost the publish race for `{}`, reusing the winner's file",
                        target.display()
                    );
                    Ok(target.to_owned())
                } else {
                    if target.exists() {
                        let _ = std::fs::remove_file(target);
                    }
                    Err(CacheError::DownloadError(err.error.to_string()))
                }
            }
        }
    }

    /// Streams the artifact into a fresh temporary file inside `dir`.
    ///
    /// The whole fetch, from opening the remote stream to the last byte on
    /// disk, runs under the `max_download` timeout. On any failure the
    /// temporary file is removed when the [`NamedTempFile`] drops.
    async fn fetch(
        &self,
        dir: &Path,
        source: &impl StreamProvider,
    ) -> CacheContents<NamedTempFile> {
        let temp_file = self.cache.tempfile_in(dir)?;

        let job = stream_to_file(source, temp_file.path());
        let job = tokio::time::timeout(self.timeouts.max_download, job);

        match job.await {
            Ok(Ok(())) => Ok(temp_file),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CacheError::Timeout(self.timeouts.max_download)),
        }
    }
}

/// Copies all bytes from the provider's stream into the file at `path`.
async fn stream_to_file(source: &impl StreamProvider, path: &Path) -> CacheContents {
    let Some(mut stream) = source.open_stream().await? else {
        return Err(CacheError::NullStream);
    };

    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = stream.next().await.transpose()? {
        file.write_all(&chunk).await?;
    }
    Ok(file.flush().await?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::test;

    use super::*;

    const HELLO: &[u8] = b"hello\n";
    const HELLO_SHA: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
    const CORRUPT: &[u8] = b"corrupt\n";

    fn artifact() -> ArtifactDescriptor {
        ArtifactDescriptor::new("jre.tar.gz", HELLO_SHA)
    }

    fn chunked(bytes: &[u8]) -> ByteStream {
        let chunks: Vec<CacheContents<Bytes>> = bytes
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    /// Serves fixed bytes, counting how often the stream was opened.
    struct BytesProvider {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl BytesProvider {
        fn new(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl StreamProvider for BytesProvider {
        async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(chunked(&self.bytes)))
        }
    }

    struct NullProvider;

    impl StreamProvider for NullProvider {
        async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
            Ok(None)
        }
    }

    struct FailingProvider {
        calls: AtomicUsize,
    }

    impl StreamProvider for FailingProvider {
        async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CacheError::DownloadError("connection reset by peer".into()))
        }
    }

    /// Plants a file at the final target path when the stream is opened,
    /// simulating a concurrent process publishing mid-download.
    struct PlantingProvider {
        target: PathBuf,
        planted: Vec<u8>,
        /// `None` fails the download after planting, `Some` streams the bytes.
        bytes: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl StreamProvider for PlantingProvider {
        async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
            let calls = self.calls.fetch_add(1, Ordering::Relaxed);
            if calls == 0 {
                std::fs::write(&self.target, &self.planted).unwrap();
                match &self.bytes {
                    Some(bytes) => Ok(Some(chunked(bytes))),
                    None => Err(CacheError::DownloadError("connection reset by peer".into())),
                }
            } else {
                // Later attempts download cleanly.
                Ok(Some(chunked(HELLO)))
            }
        }
    }

    struct Setup {
        // Held so the cache directory outlives the test body.
        _dir: test::TempDir,
        cache: Cache,
        service: Arc<DownloadService>,
    }

    fn setup() -> Setup {
        test::setup();
        let dir = test::tempdir();
        let cache = Cache::new(dir.path().join("cache"));
        let service = DownloadService::new(cache.clone(), DownloadTimeouts::default());
        Setup {
            _dir: dir,
            cache,
            service,
        }
    }

    /// All files currently in the per-artifact directory.
    fn dir_entries(cache: &Cache, artifact: &ArtifactDescriptor) -> Vec<String> {
        let dir = cache.cache_dir().join(artifact.checksum());
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().into_string().unwrap())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }

    #[tokio::test]
    async fn test_download_publishes_and_short_circuits() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();
        let provider = BytesProvider::new(HELLO);

        assert_eq!(
            cache.lookup(&artifact).unwrap(),
            crate::caching::CacheStatus::Miss
        );

        let path = service.download(&artifact, &provider).await.unwrap();
        assert_eq!(path, cache.artifact_path(&artifact));
        assert_eq!(std::fs::read(&path).unwrap(), HELLO);
        assert_eq!(
            cache.lookup(&artifact).unwrap(),
            crate::caching::CacheStatus::Hit(path.clone())
        );

        // The second call returns the published file without opening a stream.
        let again = service.download(&artifact, &provider).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(provider.calls(), 1);

        // No temporary files left behind.
        assert_eq!(dir_entries(&cache, &artifact), vec!["jre.tar.gz"]);
    }

    #[tokio::test]
    async fn test_content_addressing_keeps_artifacts_apart() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();

        let first = artifact();
        let second = ArtifactDescriptor::new(
            "jre.tar.gz",
            "b074a170d765bacc3ea1745db8b1dbd6efc07ac6b41d70f6eb3102b07be41ac1",
        );

        service
            .download(&first, &BytesProvider::new(HELLO))
            .await
            .unwrap();

        // Same file name, different checksum: still a miss, and downloading it
        // does not disturb the first artifact.
        assert_eq!(
            cache.lookup(&second).unwrap(),
            crate::caching::CacheStatus::Miss
        );

        service
            .download(&second, &BytesProvider::new(b"runtime archive bytes\n"))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(cache.artifact_path(&first)).unwrap(),
            HELLO
        );
        assert_eq!(
            std::fs::read(cache.artifact_path(&second)).unwrap(),
            b"runtime archive bytes\n"
        );
    }

    #[tokio::test]
    async fn test_null_stream() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();

        let result = service.download(&artifact, &NullProvider).await;
        assert_eq!(result, Err(CacheError::NullStream));
        assert_eq!(result.unwrap_err().to_string(), "download stream is null");

        // The temp file was created and deleted again, never left behind.
        assert!(dir_entries(&cache, &artifact).is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_bounded_and_clean() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();
        let provider = BytesProvider::new(b"not the artifact\n");

        let result = service.download(&artifact, &provider).await;
        assert_eq!(result, Err(CacheError::ChecksumMismatch));
        // One retry, then give up.
        assert_eq!(provider.calls(), 2);
        assert!(dir_entries(&cache, &artifact).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cached_file_is_replaced() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();
        let target = cache.artifact_path(&artifact);

        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, CORRUPT).unwrap();

        let provider = BytesProvider::new(HELLO);
        let path = service.download(&artifact, &provider).await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), HELLO);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_winner_is_reused_on_failure() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();

        let provider = PlantingProvider {
            target: cache.artifact_path(&artifact),
            planted: HELLO.to_vec(),
            bytes: None,
            calls: AtomicUsize::new(0),
        };

        // Our download fails, but the winner's valid file is picked up
        // without a second network attempt.
        let path = service.download(&artifact, &provider).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), HELLO);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_corrupt_winner_is_deleted_and_retried() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();

        let provider = PlantingProvider {
            target: cache.artifact_path(&artifact),
            planted: CORRUPT.to_vec(),
            bytes: None,
            calls: AtomicUsize::new(0),
        };

        let path = service.download(&artifact, &provider).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), HELLO);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
        assert_eq!(dir_entries(&cache, &artifact), vec!["jre.tar.gz"]);
    }

    #[tokio::test]
    async fn test_lost_publish_race_reuses_winner() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();

        // The winner's file appears right after we open our stream; our own
        // download still completes and validates, but must not clobber it.
        let provider = PlantingProvider {
            target: cache.artifact_path(&artifact),
            planted: HELLO.to_vec(),
            bytes: Some(HELLO.to_vec()),
            calls: AtomicUsize::new(0),
        };

        let path = service.download(&artifact, &provider).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), HELLO);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
        assert_eq!(dir_entries(&cache, &artifact), vec!["jre.tar.gz"]);
    }

    #[tokio::test]
    async fn test_transport_error_carries_message() {
        let Setup {
            _dir,
            cache,
            service,
        } = setup();
        let artifact = artifact();
        let provider = FailingProvider {
            calls: AtomicUsize::new(0),
        };

        let result = service.download(&artifact, &provider).await;
        assert_eq!(
            result,
            Err(CacheError::DownloadError("connection reset by peer".into()))
        );
        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
        assert!(dir_entries(&cache, &artifact).is_empty());
    }

    #[tokio::test]
    async fn test_download_timeout() {
        test::setup();
        let dir = test::tempdir();
        let cache = Cache::new(dir.path().join("cache"));
        let timeouts = DownloadTimeouts {
            max_download: std::time::Duration::from_millis(50),
            ..Default::default()
        };
        let service = DownloadService::new(cache.clone(), timeouts);
        let artifact = artifact();

        struct StalledProvider;

        impl StreamProvider for StalledProvider {
            async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
                Ok(Some(futures::stream::pending().boxed()))
            }
        }

        let result = service.download(&artifact, &StalledProvider).await;
        assert_eq!(
            result,
            Err(CacheError::Timeout(std::time::Duration::from_millis(50)))
        );
        assert!(dir_entries(&cache, &artifact).is_empty());
    }
}
