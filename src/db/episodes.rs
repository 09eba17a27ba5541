//! Episode rows and their archived asset references.

use crate::error::DatabaseError;
use crate::types::{AssetKind, DownloadStatus, ShowId, StoredAsset};
use crate::{Error, Result};

use super::{Database, Episode, NewEpisode};

const EPISODE_COLUMNS: &str = r#"
    id, show_id, episode_number, title, guid, published_at, media_url, media_sources,
    image_url, duration_secs, description, status, audio_path, audio_hash, audio_size,
    image_path, image_hash, image_size, last_error_code, last_error, was_downloaded,
    downloaded_at, deleted_at, in_feed, created_at, updated_at
"#;

/// What [`Database::upsert_episode`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Row was created
    Inserted,
    /// Existing row's feed fields changed
    Updated,
    /// Existing row already matched the feed
    Unchanged,
}

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        what, e
    )))
}

impl Database {
    /// Insert an episode or refresh the feed-derived fields of an existing one
    ///
    /// Download state (status, asset references, timestamps) is never touched.
    pub async fn upsert_episode(&self, show_id: ShowId, ep: &NewEpisode) -> Result<UpsertOutcome> {
        let now = chrono::Utc::now().timestamp();
        let sources = serde_json::to_string(&ep.media_sources)?;
        let duration = ep.duration_secs.map(|d| d as i64);
        let number = i64::from(ep.episode_number);

        let existing = self.get_episode(show_id, ep.episode_number).await?;
        let Some(existing) = existing else {
            sqlx::query(
                r#"
                INSERT INTO episodes (
                    show_id, episode_number, title, guid, published_at, media_url,
                    media_sources, image_url, duration_secs, description,
                    status, in_feed, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                "#,
            )
            .bind(show_id)
            .bind(number)
            .bind(&ep.title)
            .bind(&ep.guid)
            .bind(ep.published_at)
            .bind(&ep.media_url)
            .bind(&sources)
            .bind(&ep.image_url)
            .bind(duration)
            .bind(&ep.description)
            .bind(DownloadStatus::NotDownloaded.to_i32())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("insert episode", e))?;
            return Ok(UpsertOutcome::Inserted);
        };

        let changed = existing.title != ep.title
            || existing.guid != ep.guid
            || existing.published_at != ep.published_at
            || existing.media_url != ep.media_url
            || existing.media_sources.as_deref() != Some(sources.as_str())
            || existing.image_url != ep.image_url
            || existing.duration_secs != duration
            || existing.description != ep.description
            || existing.in_feed == 0;
        if !changed {
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE episodes
            SET title = ?, guid = ?, published_at = ?, media_url = ?, media_sources = ?,
                image_url = ?, duration_secs = ?, description = ?, in_feed = 1, updated_at = ?
            WHERE show_id = ? AND episode_number = ?
            "#,
        )
        .bind(&ep.title)
        .bind(&ep.guid)
        .bind(ep.published_at)
        .bind(&ep.media_url)
        .bind(&sources)
        .bind(&ep.image_url)
        .bind(duration)
        .bind(&ep.description)
        .bind(now)
        .bind(show_id)
        .bind(number)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update episode", e))?;

        Ok(UpsertOutcome::Updated)
    }

    /// Get one episode by number
    pub async fn get_episode(&self, show_id: ShowId, number: u32) -> Result<Option<Episode>> {
        let row = sqlx::query_as::<_, Episode>(&format!(
            "SELECT {} FROM episodes WHERE show_id = ? AND episode_number = ?",
            EPISODE_COLUMNS
        ))
        .bind(show_id)
        .bind(i64::from(number))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get episode", e))?;

        Ok(row)
    }

    /// All episodes of a show, ascending by episode number
    pub async fn list_episodes(&self, show_id: ShowId) -> Result<Vec<Episode>> {
        let rows = sqlx::query_as::<_, Episode>(&format!(
            "SELECT {} FROM episodes WHERE show_id = ? ORDER BY episode_number ASC",
            EPISODE_COLUMNS
        ))
        .bind(show_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list episodes", e))?;

        Ok(rows)
    }

    /// Episode numbers of a show, ascending
    pub async fn episode_numbers(&self, show_id: ShowId) -> Result<Vec<u32>> {
        let numbers: Vec<i64> = sqlx::query_scalar(
            "SELECT episode_number FROM episodes WHERE show_id = ? ORDER BY episode_number ASC",
        )
        .bind(show_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list episode numbers", e))?;

        Ok(numbers
            .into_iter()
            .filter_map(|n| u32::try_from(n).ok())
            .collect())
    }

    /// Record an archived file for an episode asset
    ///
    /// For audio this also sets the status to `downloaded` and clears the last error.
    pub async fn record_asset(
        &self,
        show_id: ShowId,
        number: u32,
        kind: AssetKind,
        asset: &StoredAsset,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let path = asset.path.to_string_lossy().into_owned();
        let size = asset.size as i64;

        let query = match kind {
            AssetKind::Audio => sqlx::query(
                r#"
                UPDATE episodes
                SET status = ?, audio_path = ?, audio_hash = ?, audio_size = ?,
                    last_error_code = NULL, last_error = NULL, was_downloaded = 1,
                    downloaded_at = ?, deleted_at = NULL, updated_at = ?
                WHERE show_id = ? AND episode_number = ?
                "#,
            )
            .bind(DownloadStatus::Downloaded.to_i32())
            .bind(path)
            .bind(&asset.hash)
            .bind(size)
            .bind(now)
            .bind(now),
            AssetKind::Image => sqlx::query(
                r#"
                UPDATE episodes
                SET image_path = ?, image_hash = ?, image_size = ?, updated_at = ?
                WHERE show_id = ? AND episode_number = ?
                "#,
            )
            .bind(path)
            .bind(&asset.hash)
            .bind(size)
            .bind(now),
        };

        let result = query
            .bind(show_id)
            .bind(i64::from(number))
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("record archived file", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "episode {} of show {}",
                number, show_id
            ))));
        }
        Ok(())
    }

    /// Forget an episode asset whose file is gone
    ///
    /// Audio goes back to `not_downloaded` with `deleted_at` stamped; `was_downloaded` is kept.
    pub async fn clear_asset(&self, show_id: ShowId, number: u32, kind: AssetKind) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let query = match kind {
            AssetKind::Audio => sqlx::query(
                r#"
                UPDATE episodes
                SET status = ?, audio_path = NULL, audio_hash = NULL, audio_size = NULL,
                    deleted_at = ?, updated_at = ?
                WHERE show_id = ? AND episode_number = ?
                "#,
            )
            .bind(DownloadStatus::NotDownloaded.to_i32())
            .bind(now)
            .bind(now),
            AssetKind::Image => sqlx::query(
                r#"
                UPDATE episodes
                SET image_path = NULL, image_hash = NULL, image_size = NULL, updated_at = ?
                WHERE show_id = ? AND episode_number = ?
                "#,
            )
            .bind(now),
        };

        query
            .bind(show_id)
            .bind(i64::from(number))
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("clear archived file", e))?;

        Ok(())
    }

    /// Mark an episode's audio download as failed
    ///
    /// An episode that is already `downloaded` keeps its status and archived
    /// reference; only the error is recorded.
    pub async fn mark_episode_failed(
        &self,
        show_id: ShowId,
        number: u32,
        error_code: &str,
        message: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE episodes
            SET status = CASE WHEN status = ? THEN status ELSE ? END,
                last_error_code = ?, last_error = ?, updated_at = ?
            WHERE show_id = ? AND episode_number = ?
            "#,
        )
        .bind(DownloadStatus::Downloaded.to_i32())
        .bind(DownloadStatus::Failed.to_i32())
        .bind(error_code)
        .bind(message)
        .bind(now)
        .bind(show_id)
        .bind(i64::from(number))
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark episode failed", e))?;

        Ok(())
    }

    /// Flag episodes whose numbers are not in `present` as no longer in the feed
    ///
    /// Returns the numbers that were newly flagged.
    pub async fn mark_missing_from_feed(&self, show_id: ShowId, present: &[u32]) -> Result<Vec<u32>> {
        let mut flagged = Vec::new();
        for ep in self.list_episodes(show_id).await? {
            if ep.in_feed == 1 && !present.contains(&ep.number()) {
                sqlx::query(
                    "UPDATE episodes SET in_feed = 0, updated_at = ? WHERE id = ?",
                )
                .bind(chrono::Utc::now().timestamp())
                .bind(ep.id)
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("flag episode missing from feed", e))?;
                flagged.push(ep.number());
            }
        }
        Ok(flagged)
    }

    /// Delete one episode row
    ///
    /// Returns false if it did not exist.
    pub async fn delete_episode(&self, show_id: ShowId, number: u32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM episodes WHERE show_id = ? AND episode_number = ?")
            .bind(show_id)
            .bind(i64::from(number))
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("delete episode", e))?;

        Ok(result.rows_affected() > 0)
    }
}
