//! Configuration types for parchive
//!
//! A [`Config`] is loaded once (from TOML, or defaults when no file exists),
//! validated, and then shared immutably behind an `Arc` by every component.

use crate::error::{Error, Result};
use crate::naming::AUDIO_EXTENSIONS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Archive layout, concurrency and timeouts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root of the archive; every show gets a `<show_id>/` directory below it (default: "downloads")
    #[serde(default = "default_download_directory")]
    pub download_directory: PathBuf,

    /// Maximum concurrent download tasks per batch, 0 = unbounded (default: 3)
    #[serde(default = "default_max_parallel_downloads")]
    pub max_parallel_downloads: usize,

    /// Connect timeout per request (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Maximum silence between body chunks (default: 60 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            download_directory: default_download_directory(),
            max_parallel_downloads: default_max_parallel_downloads(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

/// Database location and show lease settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file (default: "data/parchive.db")
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Age after which a show lease is taken over (default: 60 seconds)
    ///
    /// Live holders refresh their lease several times per window, so only a
    /// lease left behind by a dead process ever gets this old.
    #[serde(default = "default_lease_timeout", with = "duration_serde")]
    pub lease_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            lease_timeout: default_lease_timeout(),
        }
    }
}

/// What gets downloaded and how failures are retried
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadsConfig {
    /// Fetch the show cover into `cover.<ext>` (default: true)
    #[serde(default = "default_true")]
    pub download_covers: bool,

    /// Download per-episode artwork alongside the audio (default: true)
    #[serde(default = "default_true")]
    pub download_episode_images: bool,

    /// Keep a copy of the feed as `feed.xml` (default: true)
    #[serde(default = "default_true")]
    pub save_feed_xml: bool,

    /// Write `metadata.json` describing the last batch (default: true)
    #[serde(default = "default_true")]
    pub save_metadata_json: bool,

    /// Retries after the first attempt for transient failures (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Multiplier applied to the delay after each retry, 1.0 = fixed delay (default: 1.0)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,

    /// Skip assets that are already archived (default: true)
    #[serde(default = "default_true")]
    pub skip_existing_files: bool,

    /// Audio formats in order of preference (default: mp3, m4a, ogg, aac)
    #[serde(default = "default_preferred_formats")]
    pub preferred_formats: Vec<String>,

    /// Minimum audio bitrate in kbps, 0 disables the check (default: 64)
    #[serde(default = "default_min_audio_quality")]
    pub min_audio_quality: u32,

    /// Largest feed document or cover image read into memory (default: 32 MiB)
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: u64,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            download_covers: true,
            download_episode_images: true,
            save_feed_xml: true,
            save_metadata_json: true,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            retry_backoff: default_retry_backoff(),
            skip_existing_files: true,
            preferred_formats: default_preferred_formats(),
            min_audio_quality: default_min_audio_quality(),
            max_feed_bytes: default_max_feed_bytes(),
        }
    }
}

impl DownloadsConfig {
    /// Retry policy derived from `max_retries`, `retry_delay` and `retry_backoff`
    pub fn retry_config(&self) -> RetryConfig {
        let ceiling =
            self.retry_delay.as_secs_f64() * self.retry_backoff.powi(self.max_retries as i32);
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay: self.retry_delay,
            max_delay: Duration::try_from_secs_f64(ceiling).unwrap_or(Duration::MAX),
            backoff_multiplier: self.retry_backoff,
            jitter: false,
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Proxy for all requests (e.g. "http://proxy:3128"), None = direct
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Verify TLS certificates (default: true)
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Maximum redirects to follow (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            proxy_url: None,
            verify_ssl: true,
            max_redirects: default_max_redirects(),
        }
    }
}

/// Main configuration
///
/// Sections mirror the TOML file layout:
///
/// ```toml
/// [general]
/// download_directory = "downloads"
/// max_parallel_downloads = 3
///
/// [downloads]
/// max_retries = 3
/// retry_delay = 5
/// preferred_formats = ["mp3", "m4a"]
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Archive layout, concurrency and timeouts
    #[serde(default)]
    pub general: GeneralConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Download behaviour
    #[serde(default)]
    pub downloads: DownloadsConfig,

    /// HTTP client settings
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// parsed, or whose values fail [`Config::validate`], is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(Error::Config {
                    message: format!("failed to read {}: {}", path.display(), e),
                    key: None,
                });
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.general.download_directory.as_os_str().is_empty() {
            return Err(invalid("general.download_directory", "must not be empty"));
        }
        if self.general.connect_timeout.is_zero() {
            return Err(invalid("general.connect_timeout", "must be at least 1 second"));
        }
        if self.general.read_timeout.is_zero() {
            return Err(invalid("general.read_timeout", "must be at least 1 second"));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path", "must not be empty"));
        }
        if self.database.lease_timeout.as_secs() == 0 {
            return Err(invalid("database.lease_timeout", "must be at least 1 second"));
        }
        if self.downloads.max_feed_bytes == 0 {
            return Err(invalid("downloads.max_feed_bytes", "must be greater than 0"));
        }
        if !self.downloads.retry_backoff.is_finite() || self.downloads.retry_backoff < 1.0 {
            return Err(invalid("downloads.retry_backoff", "must be 1.0 or greater"));
        }
        if self.downloads.preferred_formats.is_empty() {
            return Err(invalid(
                "downloads.preferred_formats",
                "must list at least one format",
            ));
        }
        for format in &self.downloads.preferred_formats {
            let normalized = format.trim_start_matches('.').to_ascii_lowercase();
            if !AUDIO_EXTENSIONS.contains(&normalized.as_str()) {
                return Err(invalid(
                    "downloads.preferred_formats",
                    &format!(
                        "unknown format '{}' (known: {})",
                        format,
                        AUDIO_EXTENSIONS.join(", ")
                    ),
                ));
            }
        }
        if let Some(proxy) = &self.network.proxy_url
            && let Err(e) = url::Url::parse(proxy)
        {
            return Err(invalid(
                "network.proxy_url",
                &format!("'{}' is not a valid URL: {}", proxy, e),
            ));
        }
        Ok(())
    }

    /// Directory holding one show's archive
    pub fn show_dir(&self, show_id: crate::types::ShowId) -> PathBuf {
        self.general.download_directory.join(show_id.to_string())
    }

    /// Preferred audio formats, normalized to lowercase extensions
    pub fn preferred_formats(&self) -> Vec<String> {
        self.downloads
            .preferred_formats
            .iter()
            .map(|f| f.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{}: {}", key, message),
        key: Some(key.to_string()),
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,

    /// Add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DownloadsConfig::default().retry_config()
    }
}

fn default_download_directory() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_parallel_downloads() -> usize {
    3
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/parchive.db")
}

fn default_lease_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_feed_bytes() -> u64 {
    32 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_backoff() -> f64 {
    1.0
}

fn default_preferred_formats() -> Vec<String> {
    vec!["mp3".into(), "m4a".into(), "ogg".into(), "aac".into()]
}

fn default_min_audio_quality() -> u32 {
    64
}

fn default_user_agent() -> String {
    "Parchive Podcast Archiver/1.0".to_string()
}

fn default_max_redirects() -> usize {
    5
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
