//! Show registration, feed sync, listing and deletion.

use crate::db::{NewEpisode, NewShow, Show, UpsertOutcome};
use crate::error::{DatabaseError, DownloadError, Error, Result};
use crate::feed::{ParsedFeed, load_feed};
use crate::reconcile::list_archive_files;
use crate::selector::EpisodeSelector;
use crate::types::{AssetKind, DownloadStatus, ShowId};
use serde::Serialize;
use std::path::PathBuf;

use super::Archiver;

/// Result of reading a feed into the database
#[derive(Clone, Debug, Serialize)]
pub struct SyncSummary {
    /// Synced show
    pub show_id: ShowId,
    /// Show title from the feed
    pub title: String,
    /// Episodes seen for the first time
    pub added: Vec<u32>,
    /// Episodes whose feed details changed
    pub updated: Vec<u32>,
    /// Episodes that were already up to date
    pub unchanged: usize,
    /// Stored episodes that the feed no longer lists (kept, flagged)
    pub missing_from_feed: Vec<u32>,
}

/// One row of an episode listing
#[derive(Clone, Debug, Serialize)]
pub struct EpisodeSummary {
    /// Episode number
    pub number: u32,
    /// Title
    pub title: String,
    /// Audio download status
    pub status: DownloadStatus,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// Archived audio file
    pub audio_path: Option<PathBuf>,
    /// Archived artwork file
    pub image_path: Option<PathBuf>,
    /// Still listed in the feed
    pub in_feed: bool,
    /// Last download error
    pub last_error: Option<String>,
}

impl Archiver {
    /// Register a show from its feed URL and store its episodes
    pub async fn add_show(&self, feed_url: &str) -> Result<SyncSummary> {
        let feed_url = feed_url.trim();
        if let Some(existing) = self.db.find_show_by_url(feed_url).await? {
            return Err(Error::Database(DatabaseError::ConstraintViolation(format!(
                "feed {} is already registered as show {}",
                feed_url, existing.id
            ))));
        }

        let feed = load_feed(
            self.fetcher.as_ref(),
            feed_url,
            self.config.general.read_timeout,
            self.config.downloads.max_feed_bytes,
        )
        .await?;
        let show_id = self.db.insert_show(&new_show(feed_url, &feed)).await?;
        let summary = self.store_feed(show_id, feed_url, &feed).await?;

        tracing::info!(
            show_id = %show_id,
            title = %summary.title,
            episodes = summary.added.len(),
            "Added show"
        );
        Ok(summary)
    }

    /// Re-read a show's feed: new episodes are added, changed ones updated
    ///
    /// Episodes that disappeared from the feed are kept and reported.
    pub async fn sync_show(&self, show_id: ShowId) -> Result<SyncSummary> {
        let show = self.db.require_show(show_id).await?;
        self.with_show_lease(show_id, "sync", || async {
            self.sync_show_unlocked(&show).await
        })
        .await
    }

    /// Sync without taking the lease; the caller holds it
    pub(super) async fn sync_show_unlocked(&self, show: &Show) -> Result<SyncSummary> {
        let feed = load_feed(
            self.fetcher.as_ref(),
            &show.feed_url,
            self.config.general.read_timeout,
            self.config.downloads.max_feed_bytes,
        )
        .await?;
        let summary = self.store_feed(show.id, &show.feed_url, &feed).await?;

        tracing::info!(
            show_id = %show.id,
            added = summary.added.len(),
            updated = summary.updated.len(),
            missing = summary.missing_from_feed.len(),
            "Synced feed"
        );
        Ok(summary)
    }

    async fn store_feed(
        &self,
        show_id: ShowId,
        feed_url: &str,
        feed: &ParsedFeed,
    ) -> Result<SyncSummary> {
        self.db
            .update_show_metadata(show_id, &new_show(feed_url, feed))
            .await?;

        let mut summary = SyncSummary {
            show_id,
            title: feed.title.clone(),
            added: Vec::new(),
            updated: Vec::new(),
            unchanged: 0,
            missing_from_feed: Vec::new(),
        };
        for episode in &feed.episodes {
            match self
                .db
                .upsert_episode(show_id, &NewEpisode::from(episode))
                .await?
            {
                UpsertOutcome::Inserted => summary.added.push(episode.number),
                UpsertOutcome::Updated => summary.updated.push(episode.number),
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
        }
        summary.added.sort_unstable();
        summary.updated.sort_unstable();

        let present: Vec<u32> = feed.episodes.iter().map(|e| e.number).collect();
        summary.missing_from_feed = self.db.mark_missing_from_feed(show_id, &present).await?;
        if !summary.missing_from_feed.is_empty() {
            tracing::warn!(
                show_id = %show_id,
                episodes = ?summary.missing_from_feed,
                "Episodes no longer in the feed are kept in the archive"
            );
        }

        self.save_feed_snapshot(show_id, feed).await;
        Ok(summary)
    }

    /// All registered shows
    pub async fn list_shows(&self) -> Result<Vec<Show>> {
        self.db.list_shows().await
    }

    /// Episodes of a show with their download status, ascending
    pub async fn list_episodes(&self, show_id: ShowId) -> Result<Vec<EpisodeSummary>> {
        self.db.require_show(show_id).await?;
        let episodes = self.db.list_episodes(show_id).await?;

        Ok(episodes
            .into_iter()
            .map(|ep| EpisodeSummary {
                number: ep.number(),
                status: ep.download_status(),
                audio_path: ep.asset(AssetKind::Audio).map(|a| a.path),
                image_path: ep.asset(AssetKind::Image).map(|a| a.path),
                in_feed: ep.in_feed == 1,
                published_at: ep.published_at,
                last_error: ep.last_error,
                title: ep.title,
            })
            .collect())
    }

    /// Delete a show and its episodes, and with `remove_files` its directory
    pub async fn delete_show(&self, show_id: ShowId, remove_files: bool) -> Result<()> {
        self.db.require_show(show_id).await?;
        self.with_show_lease(show_id, "delete", || async {
            if remove_files {
                let show_dir = self.config.show_dir(show_id);
                match tokio::fs::remove_dir_all(&show_dir).await {
                    Ok(()) => {
                        tracing::info!(show_id = %show_id, dir = %show_dir.display(), "Removed show directory");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            self.db.delete_show(show_id).await?;
            tracing::info!(show_id = %show_id, "Deleted show");
            Ok(())
        })
        .await
    }

    /// Delete the selected episodes, and with `remove_files` their archive files
    ///
    /// Returns the numbers that were deleted; unknown numbers are skipped.
    pub async fn delete_episodes(
        &self,
        show_id: ShowId,
        selector: &EpisodeSelector,
        remove_files: bool,
    ) -> Result<Vec<u32>> {
        self.db.require_show(show_id).await?;
        self.with_show_lease(show_id, "delete", || async {
            let known = self.db.episode_numbers(show_id).await?;
            let show_dir = self.config.show_dir(show_id);
            let on_disk = if remove_files {
                list_archive_files(&show_dir).await?
            } else {
                Vec::new()
            };

            let mut deleted = Vec::new();
            for number in selector.resolve(&known) {
                if known.binary_search(&number).is_err() {
                    tracing::warn!(show_id = %show_id, episode = number, "Episode not found, nothing to delete");
                    continue;
                }

                for file in on_disk.iter().filter(|f| f.episode() == number) {
                    tokio::fs::remove_file(&file.path).await?;
                    tracing::debug!(path = %file.path.display(), "Removed archive file");
                }

                if self.db.delete_episode(show_id, number).await? {
                    deleted.push(number);
                }
            }

            tracing::info!(show_id = %show_id, episodes = ?deleted, "Deleted episodes");
            Ok(deleted)
        })
        .await
    }

    /// Mark an episode's audio as no longer archived after it was removed by hand
    ///
    /// `deleted_at` is stamped; the `was_downloaded` history is kept.
    pub async fn mark_deleted(&self, show_id: ShowId, episode: u32) -> Result<()> {
        self.db.require_show(show_id).await?;
        self.with_show_lease(show_id, "mark-deleted", || async {
            if self.db.get_episode(show_id, episode).await?.is_none() {
                return Err(Error::Download(DownloadError::EpisodeNotFound {
                    show_id,
                    episode,
                }));
            }
            self.db.clear_asset(show_id, episode, AssetKind::Audio).await?;
            tracing::info!(show_id = %show_id, episode, "Marked episode audio as deleted");
            Ok(())
        })
        .await
    }
}

fn new_show(feed_url: &str, feed: &ParsedFeed) -> NewShow {
    NewShow {
        feed_url: feed_url.to_string(),
        title: feed.title.clone(),
        description: feed.description.clone(),
        author: feed.author.clone(),
        language: feed.language.clone(),
        image_url: feed.image_url.clone(),
    }
}
