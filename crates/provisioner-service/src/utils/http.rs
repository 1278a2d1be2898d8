use std::time::Duration;

use crate::config::Config;

/// Various timeouts for the download path.
#[derive(Copy, Clone, Debug)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// The timeout for receiving the first headers.
    pub head: Duration,
    /// Global timeout for one download.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            head: config.head_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(500),
            head: Duration::from_secs(5),
            max_download: Duration::from_secs(315),
        }
    }
}

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// The total timeout is left to the download orchestrator, which enforces
/// `max_download` around the whole stream copy; applying it here as well
/// would double-count time spent between retries.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}
