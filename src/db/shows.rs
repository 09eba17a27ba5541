//! Show CRUD operations.

use crate::error::DatabaseError;
use crate::types::ShowId;
use crate::{Error, Result};

use super::{Database, NewShow, Show};

const SHOW_COLUMNS: &str = r#"
    id, feed_url, title, description, author, language, image_url,
    created_at, updated_at, last_synced_at
"#;

impl Database {
    /// Insert a new show
    ///
    /// Fails with [`DatabaseError::ConstraintViolation`] when the feed URL is already registered.
    pub async fn insert_show(&self, show: &NewShow) -> Result<ShowId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO shows (
                feed_url, title, description, author, language, image_url,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&show.feed_url)
        .bind(&show.title)
        .bind(&show.description)
        .bind(&show.author)
        .bind(&show.language)
        .bind(&show.image_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "show with feed URL {} already exists",
                    show.feed_url
                )))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert show: {}",
                e
            ))),
        })?;

        Ok(ShowId(result.last_insert_rowid()))
    }

    /// Get a show by ID
    pub async fn get_show(&self, id: ShowId) -> Result<Option<Show>> {
        let row = sqlx::query_as::<_, Show>(&format!(
            "SELECT {} FROM shows WHERE id = ?",
            SHOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get show: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Get a show by ID, failing with [`Error::ShowNotFound`] when absent
    pub async fn require_show(&self, id: ShowId) -> Result<Show> {
        self.get_show(id).await?.ok_or(Error::ShowNotFound(id))
    }

    /// Find a show by its feed URL
    pub async fn find_show_by_url(&self, feed_url: &str) -> Result<Option<Show>> {
        let row = sqlx::query_as::<_, Show>(&format!(
            "SELECT {} FROM shows WHERE feed_url = ?",
            SHOW_COLUMNS
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find show by URL: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all shows ordered by ID
    pub async fn list_shows(&self) -> Result<Vec<Show>> {
        let rows = sqlx::query_as::<_, Show>(&format!(
            "SELECT {} FROM shows ORDER BY id ASC",
            SHOW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list shows: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Replace a show's feed-derived metadata and stamp the sync time
    pub async fn update_show_metadata(&self, id: ShowId, show: &NewShow) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE shows
            SET title = ?, description = ?, author = ?, language = ?, image_url = ?,
                updated_at = ?, last_synced_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&show.title)
        .bind(&show.description)
        .bind(&show.author)
        .bind(&show.language)
        .bind(&show.image_url)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update show: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::ShowNotFound(id));
        }
        Ok(())
    }

    /// Delete a show; its episodes and lease go with it
    ///
    /// Returns false if the show did not exist.
    pub async fn delete_show(&self, id: ShowId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete show: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
