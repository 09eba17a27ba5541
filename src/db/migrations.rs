//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Foreign keys for cascading show deletes, WAL so tasks can write while scans read
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        Self::execute(
            &mut conn,
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
            "create schema_version table",
        )
        .await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: shows and episodes
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");
        Self::begin(conn).await?;

        let result = async {
            Self::create_shows_table(conn).await?;
            Self::create_episodes_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::commit_or_rollback(conn, 1, result).await?;
        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: per-show leases
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");
        Self::begin(conn).await?;

        let result = async {
            Self::execute(
                conn,
                r#"
                CREATE TABLE IF NOT EXISTS show_leases (
                    show_id INTEGER PRIMARY KEY REFERENCES shows(id) ON DELETE CASCADE,
                    operation TEXT NOT NULL,
                    holder TEXT NOT NULL,
                    acquired_at INTEGER NOT NULL
                )
                "#,
                "create show_leases table",
            )
            .await?;
            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::commit_or_rollback(conn, 2, result).await?;
        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    /// Create the shows table
    async fn create_shows_table(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute(
            conn,
            r#"
            CREATE TABLE shows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                author TEXT,
                language TEXT,
                image_url TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_synced_at INTEGER
            )
            "#,
            "create shows table",
        )
        .await
    }

    /// Create the episodes table and its indexes
    async fn create_episodes_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute(
            conn,
            r#"
            CREATE TABLE episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                show_id INTEGER NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
                episode_number INTEGER NOT NULL,
                title TEXT NOT NULL,
                guid TEXT,
                published_at INTEGER,
                media_url TEXT,
                media_sources TEXT,
                image_url TEXT,
                duration_secs INTEGER,
                description TEXT,
                status INTEGER NOT NULL DEFAULT 0,
                audio_path TEXT,
                audio_hash TEXT,
                audio_size INTEGER,
                image_path TEXT,
                image_hash TEXT,
                image_size INTEGER,
                last_error_code TEXT,
                last_error TEXT,
                was_downloaded INTEGER NOT NULL DEFAULT 0,
                downloaded_at INTEGER,
                deleted_at INTEGER,
                in_feed INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(show_id, episode_number)
            )
            "#,
            "create episodes table",
        )
        .await?;

        Self::execute(
            conn,
            "CREATE INDEX idx_episodes_status ON episodes(show_id, status)",
            "create index",
        )
        .await
    }

    async fn execute(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn begin(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute(conn, "BEGIN", "begin transaction").await
    }

    /// Commit a migration, or roll it back so partial failures don't leave the schema broken
    async fn commit_or_rollback(
        conn: &mut SqliteConnection,
        version: i32,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                Self::execute(conn, "COMMIT", &format!("commit migration v{}", version)).await
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Close the pool without consuming the handle
    ///
    /// Later queries fail; used to exercise store failures.
    pub async fn close_pool(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
