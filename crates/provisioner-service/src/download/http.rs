//! Support to download artifacts from HTTP servers.

use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use url::Url;

use crate::caching::{CacheContents, CacheError};
use crate::utils::http::DownloadTimeouts;

use super::{ByteStream, StreamProvider, USER_AGENT};

/// A [`StreamProvider`] that fetches the artifact from an HTTP server.
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: Client,
    url: Url,
    timeouts: DownloadTimeouts,
}

impl HttpArtifactSource {
    pub fn new(client: Client, url: Url, timeouts: DownloadTimeouts) -> Self {
        Self {
            client,
            url,
            timeouts,
        }
    }
}

impl StreamProvider for HttpArtifactSource {
    async fn open_stream(&self) -> CacheContents<Option<ByteStream>> {
        tracing::debug!("Fetching artifact from `{}`", self.url);

        let builder = self
            .client
            .get(self.url.clone())
            .header(header::USER_AGENT, USER_AGENT);

        let request = tokio::time::timeout(self.timeouts.head, builder.send());
        let response = request
            .await
            .map_err(|_| CacheError::Timeout(self.timeouts.head))??;

        let status = response.status();
        if status.is_success() {
            tracing::trace!("Success hitting `{}`", self.url);
            let stream = response.bytes_stream().map_err(CacheError::from).boxed();
            Ok(Some(stream))
        } else if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
            tracing::debug!(
                "Insufficient permissions to download `{}`: {status}",
                self.url
            );
            Err(CacheError::PermissionDenied(status.to_string()))
        } else if status.is_client_error() {
            // If it's a client error, chances are it's a 404.
            tracing::debug!(
                "Unexpected client error status code from `{}`: {status}",
                self.url
            );
            Err(CacheError::NotFound)
        } else {
            tracing::debug!("Unexpected status code from `{}`: {status}", self.url);
            Err(CacheError::DownloadError(status.to_string()))
        }
    }
}
