//! Database layer for parchive
//!
//! Handles SQLite persistence for shows, episodes and show leases.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`shows`] - Show CRUD
//! - [`episodes`] - Episode rows and their archived asset references
//! - [`leases`] - Per-show mutual exclusion between download batches and scans

use crate::feed::MediaSource;
use crate::types::{AssetKind, DownloadStatus, ShowId, StoredAsset};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod episodes;
mod leases;
mod migrations;
mod shows;

pub use episodes::UpsertOutcome;

/// New show to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewShow {
    /// Feed URL (unique)
    pub feed_url: String,
    /// Show title
    pub title: String,
    /// Show description
    pub description: Option<String>,
    /// Show author
    pub author: Option<String>,
    /// Feed language
    pub language: Option<String>,
    /// Cover image URL
    pub image_url: Option<String>,
}

/// Show record from database
#[derive(Debug, Clone, FromRow)]
pub struct Show {
    /// Unique database ID
    pub id: ShowId,
    /// Feed URL
    pub feed_url: String,
    /// Show title
    pub title: String,
    /// Show description
    pub description: Option<String>,
    /// Show author
    pub author: Option<String>,
    /// Feed language
    pub language: Option<String>,
    /// Cover image URL
    pub image_url: Option<String>,
    /// Unix timestamp when the show was added
    pub created_at: i64,
    /// Unix timestamp of the last metadata change
    pub updated_at: i64,
    /// Unix timestamp of the last successful feed sync
    pub last_synced_at: Option<i64>,
}

/// Episode fields taken from the feed, used for insert and re-sync
#[derive(Debug, Clone)]
pub struct NewEpisode {
    /// Episode number (unique within the show)
    pub episode_number: u32,
    /// Title
    pub title: String,
    /// Item GUID
    pub guid: Option<String>,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// Primary media URL
    pub media_url: Option<String>,
    /// All media renditions, primary first
    pub media_sources: Vec<MediaSource>,
    /// Episode artwork URL
    pub image_url: Option<String>,
    /// Declared duration in seconds
    pub duration_secs: Option<u64>,
    /// Description
    pub description: Option<String>,
}

impl From<&crate::feed::FeedEpisode> for NewEpisode {
    fn from(ep: &crate::feed::FeedEpisode) -> Self {
        Self {
            episode_number: ep.number,
            title: ep.title.clone(),
            guid: ep.guid.clone(),
            published_at: ep.published_at.map(|dt| dt.timestamp()),
            media_url: ep.media_url().map(|s| s.to_string()),
            media_sources: ep.media.clone(),
            image_url: ep.image_url.clone(),
            duration_secs: ep.duration_secs,
            description: ep.description.clone(),
        }
    }
}

/// Episode record from database
#[derive(Debug, Clone, FromRow)]
pub struct Episode {
    /// Unique database ID
    pub id: i64,
    /// Show this episode belongs to
    pub show_id: ShowId,
    /// Episode number (unique within the show)
    pub episode_number: i64,
    /// Title
    pub title: String,
    /// Item GUID
    pub guid: Option<String>,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// Primary media URL
    pub media_url: Option<String>,
    /// JSON array of media renditions
    pub media_sources: Option<String>,
    /// Episode artwork URL
    pub image_url: Option<String>,
    /// Declared duration in seconds
    pub duration_secs: Option<i64>,
    /// Description
    pub description: Option<String>,
    /// Audio download status (see [`DownloadStatus`])
    pub status: i32,
    /// Archived audio path
    pub audio_path: Option<String>,
    /// Archived audio SHA-256 (hex)
    pub audio_hash: Option<String>,
    /// Archived audio size in bytes
    pub audio_size: Option<i64>,
    /// Archived artwork path
    pub image_path: Option<String>,
    /// Archived artwork SHA-256 (hex)
    pub image_hash: Option<String>,
    /// Archived artwork size in bytes
    pub image_size: Option<i64>,
    /// Error code of the last failed download
    pub last_error_code: Option<String>,
    /// Error message of the last failed download
    pub last_error: Option<String>,
    /// Whether the audio was ever archived (0 = no, 1 = yes)
    pub was_downloaded: i32,
    /// Unix timestamp of the last successful audio download
    pub downloaded_at: Option<i64>,
    /// Unix timestamp when the audio was marked removed
    pub deleted_at: Option<i64>,
    /// Whether the item is still present in the feed (0 = no, 1 = yes)
    pub in_feed: i32,
    /// Unix timestamp when the row was created
    pub created_at: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl Episode {
    /// Episode number as stored
    pub fn number(&self) -> u32 {
        u32::try_from(self.episode_number).unwrap_or(0)
    }

    /// Audio download status
    pub fn download_status(&self) -> DownloadStatus {
        DownloadStatus::from_i32(self.status)
    }

    /// Archived reference for `kind`, if the row records one
    ///
    /// Audio only counts while the status is `downloaded`.
    pub fn asset(&self, kind: AssetKind) -> Option<StoredAsset> {
        let (path, hash, size) = match kind {
            AssetKind::Audio => {
                if self.download_status() != DownloadStatus::Downloaded {
                    return None;
                }
                (&self.audio_path, &self.audio_hash, self.audio_size)
            }
            AssetKind::Image => (&self.image_path, &self.image_hash, self.image_size),
        };
        Some(StoredAsset {
            path: PathBuf::from(path.as_ref()?),
            hash: hash.clone().unwrap_or_default(),
            size: size.unwrap_or(0).max(0) as u64,
        })
    }

    /// Media renditions, primary first
    pub fn media_sources(&self) -> Vec<MediaSource> {
        let mut sources: Vec<MediaSource> = self
            .media_sources
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        if sources.is_empty()
            && let Some(url) = &self.media_url
        {
            sources.push(MediaSource {
                url: url.clone(),
                content_type: None,
            });
        }
        sources
    }
}

/// Show lease record from database
#[derive(Debug, Clone, FromRow)]
pub struct ShowLease {
    /// Leased show
    pub show_id: ShowId,
    /// Operation holding the lease
    pub operation: String,
    /// Holder identifier
    pub holder: String,
    /// Unix timestamp when the lease was taken
    pub acquired_at: i64,
}

/// Database handle for parchive
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
