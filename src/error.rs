//! Error types for parchive
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (fetch, download task, database, config)
//! - Process exit code mapping for the command line front end
//! - Machine-readable error codes that are stored on failed episodes

use crate::types::ShowId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for parchive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for parchive
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "downloads.retry_backoff")
        key: Option<String>,
    },

    /// Episode selection expression could not be parsed
    #[error("malformed episode selector at '{token}': {reason}")]
    MalformedSelector {
        /// The offending token, verbatim (trimmed)
        token: String,
        /// Why the token was rejected
        reason: String,
    },

    /// Command line arguments are inconsistent (e.g. `--force` without `--fix`)
    #[error("invalid usage: {0}")]
    Usage(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Remote fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Download task failure
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Feed could not be parsed
    #[error("feed error: {0}")]
    Feed(String),

    /// Show does not exist
    #[error("show {0} not found")]
    ShowNotFound(ShowId),

    /// Another batch or scan currently holds the show
    #[error("show {show_id} is busy: {operation} in progress (holder {holder})")]
    ShowBusy {
        /// The show that is locked
        show_id: ShowId,
        /// Operation holding the lease ("download" or "scan")
        operation: String,
        /// Identifier of the lease holder
        holder: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate feed URL)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Failures of a single remote request
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connect or read timeout elapsed
    #[error("timed out fetching {url}")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// Connection could not be established
    #[error("connection to {url} failed: {message}")]
    Connect {
        /// Requested URL
        url: String,
        /// Underlying error text
        message: String,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body stream broke off mid-transfer
    #[error("transfer from {url} interrupted: {message}")]
    Interrupted {
        /// Requested URL
        url: String,
        /// Underlying error text
        message: String,
    },

    /// URL could not be used for a request
    #[error("invalid URL {url}: {message}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parse error text
        message: String,
    },

    /// Any other client-side failure (TLS setup, redirect loop, ...)
    #[error("request to {url} failed: {message}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying error text
        message: String,
    },
}

impl FetchError {
    /// The URL this failure refers to
    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url }
            | FetchError::Connect { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Interrupted { url, .. }
            | FetchError::InvalidUrl { url, .. }
            | FetchError::Request { url, .. } => url,
        }
    }

    /// True when the server answered 404 or 410
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404 | 410, .. })
    }
}

/// Terminal classification of a failed download task
///
/// These are the kinds recorded on an episode row when its download ends badly.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Requested episode number is not part of the show
    #[error("episode {episode} not found in show {show_id}")]
    EpisodeNotFound {
        /// Show that was searched
        show_id: ShowId,
        /// Requested episode number
        episode: u32,
    },

    /// Episode has no media URL to fetch
    #[error("episode {episode} has no {kind} URL")]
    NoSource {
        /// Episode number
        episode: u32,
        /// Asset kind ("audio" or "image")
        kind: String,
    },

    /// Transient failures persisted through every retry
    #[error("gave up after {attempts} attempts: {source}")]
    TransientFetch {
        /// Total attempts made (initial + retries)
        attempts: u32,
        /// The last transient failure observed
        source: FetchError,
    },

    /// Non-transient fetch failure (404 and other client errors)
    #[error("{0}")]
    Fetch(FetchError),

    /// Downloaded audio falls below the configured bitrate floor
    #[error("audio bitrate {bitrate_kbps} kbps is below the {min_kbps} kbps minimum")]
    QualityRejected {
        /// Estimated bitrate of the downloaded file
        bitrate_kbps: u32,
        /// Configured floor
        min_kbps: u32,
    },

    /// Body was empty or otherwise unusable
    #[error("malformed content from {url}: {reason}")]
    MalformedContent {
        /// Requested URL
        url: String,
        /// Why the content was rejected
        reason: String,
    },

    /// Final path already holds different bytes
    #[error("refusing to overwrite {path}: existing file has different content")]
    NamingCollision {
        /// Final path that is occupied
        path: PathBuf,
    },

    /// Writing the staging file failed
    #[error("failed to stage {path}: {message}")]
    Staging {
        /// Staging path
        path: PathBuf,
        /// Underlying error text
        message: String,
    },

    /// File was placed but the database record could not be updated
    #[error("file {path} placed but record update failed: {message}")]
    StoreWrite {
        /// Placed file
        path: PathBuf,
        /// Underlying error text
        message: String,
    },

    /// Batch was cancelled before the task started
    #[error("cancelled before start")]
    Cancelled,
}

impl DownloadError {
    /// Machine-readable error code for this failure
    pub fn error_code(&self) -> &'static str {
        match self {
            DownloadError::EpisodeNotFound { .. } => "episode_not_found",
            DownloadError::NoSource { .. } => "no_source",
            DownloadError::TransientFetch { .. } => "transient_fetch_error",
            DownloadError::Fetch(e) if e.is_not_found() => "not_found",
            DownloadError::Fetch(_) => "fetch_error",
            DownloadError::QualityRejected { .. } => "quality_rejected",
            DownloadError::MalformedContent { .. } => "malformed_content",
            DownloadError::NamingCollision { .. } => "naming_collision",
            DownloadError::Staging { .. } => "staging_failed",
            DownloadError::StoreWrite { .. } => "store_write_error",
            DownloadError::Cancelled => "cancelled",
        }
    }
}

/// Map errors onto process exit codes and stable error codes
pub trait ToExitCode {
    /// Exit code the command line front end should return for this error
    fn exit_code(&self) -> u8;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        match self {
            // Usage errors
            Error::Config { .. } | Error::MalformedSelector { .. } | Error::Usage(_) => 2,
            Error::ShowNotFound(_) => 3,
            Error::ShowBusy { .. } => 4,
            // Everything else is a runtime failure
            _ => 1,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::MalformedSelector { .. } => "malformed_selector",
            Error::Usage(_) => "usage_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Fetch(_) => "fetch_error",
            Error::Download(e) => e.error_code(),
            Error::Feed(_) => "feed_error",
            Error::ShowNotFound(_) => "show_not_found",
            Error::ShowBusy { .. } => "show_busy",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_exit_with_two() {
        let selector = Error::MalformedSelector {
            token: "abc".into(),
            reason: "not a number".into(),
        };
        let config = Error::Config {
            message: "bad".into(),
            key: Some("general.download_directory".into()),
        };

        assert_eq!(selector.exit_code(), 2);
        assert_eq!(config.exit_code(), 2);
        assert_eq!(selector.error_code(), "malformed_selector");
    }

    #[test]
    fn busy_and_missing_show_have_distinct_exit_codes() {
        let busy = Error::ShowBusy {
            show_id: ShowId(1),
            operation: "download".into(),
            holder: "pid 42".into(),
        };
        let missing = Error::ShowNotFound(ShowId(1));

        assert_eq!(busy.exit_code(), 4);
        assert_eq!(missing.exit_code(), 3);
        assert_eq!(
            Error::Io(std::io::Error::other("disk on fire")).exit_code(),
            1
        );
    }

    #[test]
    fn download_error_codes_distinguish_not_found() {
        let gone = DownloadError::Fetch(FetchError::Status {
            url: "https://example.com/a.mp3".into(),
            status: 404,
        });
        let forbidden = DownloadError::Fetch(FetchError::Status {
            url: "https://example.com/a.mp3".into(),
            status: 403,
        });

        assert_eq!(gone.error_code(), "not_found");
        assert_eq!(forbidden.error_code(), "fetch_error");
        assert_eq!(
            Error::Download(gone).error_code(),
            "not_found",
            "top-level code should delegate to the task classification"
        );
    }

    #[test]
    fn malformed_selector_message_names_token() {
        let err = Error::MalformedSelector {
            token: "5-1".into(),
            reason: "range start is greater than end".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'5-1'"), "message should quote the token: {msg}");
    }

    #[test]
    fn transient_fetch_message_includes_attempts() {
        let err = DownloadError::TransientFetch {
            attempts: 4,
            source: FetchError::Timeout {
                url: "https://example.com/ep.mp3".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "gave up after 4 attempts: timed out fetching https://example.com/ep.mp3"
        );
    }
}
