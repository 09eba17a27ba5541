//! Core types for parchive

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a show
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShowId(pub i64);

impl ShowId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ShowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ShowId> for i64 {
    fn from(id: ShowId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ShowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ShowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ShowId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ShowId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ShowId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download status of an episode's audio
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Never downloaded, or reset after the file went missing
    NotDownloaded,
    /// Audio file is archived
    Downloaded,
    /// Last download attempt failed terminally
    Failed,
}

impl DownloadStatus {
    /// Convert integer status code to DownloadStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            1 => DownloadStatus::Downloaded,
            2 => DownloadStatus::Failed,
            _ => DownloadStatus::NotDownloaded,
        }
    }

    /// Convert DownloadStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadStatus::NotDownloaded => 0,
            DownloadStatus::Downloaded => 1,
            DownloadStatus::Failed => 2,
        }
    }

    /// Lowercase label used in listings
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::NotDownloaded => "not_downloaded",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of archived asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Episode audio
    Audio,
    /// Episode artwork
    Image,
}

impl AssetKind {
    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Audio => "audio",
            AssetKind::Image => "image",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Reference to an archived file as stored on an episode row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    /// Path of the file
    pub path: PathBuf,
    /// Full hex SHA-256 of the file contents
    pub hash: String,
    /// Size in bytes
    pub size: u64,
}

/// Terminal state of one (episode, asset kind) task within a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// File fetched, placed and recorded
    Downloaded {
        /// Final file path
        path: PathBuf,
        /// Bytes written
        size: u64,
    },
    /// Asset already archived, nothing fetched
    Skipped {
        /// Existing file path
        path: PathBuf,
    },
    /// Task ended with a terminal error
    Failed {
        /// Machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// Requested episode number does not exist in the show
    EpisodeNotFound,
    /// Batch was cancelled before this task started
    Cancelled,
}

impl TaskOutcome {
    /// Short label for report tables
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Downloaded { .. } => "downloaded",
            TaskOutcome::Skipped { .. } => "skipped",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::EpisodeNotFound => "episode_not_found",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    /// True when the task left the asset in its desired state
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Downloaded { .. } | TaskOutcome::Skipped { .. }
        )
    }
}

/// Event emitted while archiving
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Batch accepted, tasks are about to be scheduled
    BatchStarted {
        /// Show being archived
        show_id: ShowId,
        /// Number of (episode, asset) tasks in the batch
        tasks: usize,
    },

    /// A task started transferring
    TaskStarted {
        /// Show being archived
        show_id: ShowId,
        /// Episode number
        episode: u32,
        /// Asset kind
        kind: AssetKind,
    },

    /// A transient failure is being retried
    TaskRetrying {
        /// Show being archived
        show_id: ShowId,
        /// Episode number
        episode: u32,
        /// Asset kind
        kind: AssetKind,
        /// Retry number (1-based)
        attempt: u32,
        /// Error that triggered the retry
        error: String,
    },

    /// A task reached its terminal state
    TaskFinished {
        /// Show being archived
        show_id: ShowId,
        /// Episode number
        episode: u32,
        /// Asset kind
        kind: AssetKind,
        /// Terminal state
        outcome: TaskOutcome,
    },

    /// Every task reached a terminal state
    BatchFinished {
        /// Show being archived
        show_id: ShowId,
        /// Tasks that ended unresolved
        unresolved: usize,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_status_unknown_codes_fall_back_to_not_downloaded() {
        assert_eq!(DownloadStatus::from_i32(1), DownloadStatus::Downloaded);
        assert_eq!(DownloadStatus::from_i32(2), DownloadStatus::Failed);
        assert_eq!(DownloadStatus::from_i32(99), DownloadStatus::NotDownloaded);
    }

    #[test]
    fn show_id_parses_with_surrounding_whitespace() {
        let id: ShowId = " 12 ".parse().unwrap();
        assert_eq!(id, ShowId(12));
        assert!("twelve".parse::<ShowId>().is_err());
    }

    #[test]
    fn only_downloaded_and_skipped_are_resolved() {
        assert!(
            TaskOutcome::Skipped {
                path: PathBuf::from("1_abc.mp3")
            }
            .is_resolved()
        );
        assert!(!TaskOutcome::EpisodeNotFound.is_resolved());
        assert!(!TaskOutcome::Cancelled.is_resolved());
        assert!(
            !TaskOutcome::Failed {
                code: "not_found".into(),
                message: "gone".into()
            }
            .is_resolved()
        );
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::TaskStarted {
            show_id: ShowId(3),
            episode: 7,
            kind: AssetKind::Audio,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_started");
        assert_eq!(json["kind"], "audio");
        assert_eq!(json["show_id"], 3);
    }
}
