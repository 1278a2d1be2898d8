use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the tool.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The user home directory of the tool.
    ///
    /// The shared artifact cache lives in the fixed `cache` subdirectory of
    /// this location. Defaults to `~/.provisioner`.
    pub user_home: PathBuf,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// The timeout for establishing a connection in a download.
    ///
    /// This timeout applies to each individual attempt to establish a
    /// connection with the artifact server if retries take place.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for receiving the response headers in a download.
    #[serde(with = "humantime_serde")]
    pub head_timeout: Duration,

    /// The maximum timeout for downloads.
    ///
    /// This is the upper limit one download attempt may take, from opening
    /// the remote stream until the last byte is on disk.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,
}

impl Config {
    /// Loads the config from a YAML file, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let source = fs::read_to_string(path)
                    .context(format!("failed to open file: {}", path.display()))?;
                serde_yaml::from_str(&source)
                    .context(format!("failed to parse YAML config: {}", path.display()))?
            }
            None => Config::default(),
        };
        Ok(config)
    }

    /// The directory of the shared artifact cache: `<user_home>/cache`.
    ///
    /// The directory is not created here; it comes into existence lazily the
    /// first time the cache is used.
    pub fn cache_dir(&self) -> PathBuf {
        self.user_home.join("cache")
    }
}

/// Default value for the "user_home" configuration.
fn default_user_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".provisioner")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user_home: default_user_home(),
            logging: Logging::default(),
            connect_timeout: Duration::from_secs(1),
            head_timeout: Duration::from_secs(5),
            // We want to have a hard download timeout of 5 minutes.
            // This means a download connection needs to sustain ~6,7MB/s to download a 2GB file.
            max_download_timeout: Duration::from_secs(5 * 60),
        }
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
