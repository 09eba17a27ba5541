//! Per-show leases.
//!
//! A download batch and a scan of the same show never run at once. Each takes
//! the show's lease first and refreshes it while it works; a lease that has
//! not been refreshed within the configured timeout belongs to a dead process
//! and may be taken over.

use crate::error::DatabaseError;
use crate::types::ShowId;
use crate::{Error, Result};
use std::time::Duration;

use super::{Database, ShowLease};

impl Database {
    /// Take the lease on a show for `operation`
    ///
    /// Fails with [`Error::ShowBusy`] while another holder has a fresh lease.
    pub async fn acquire_show_lease(
        &self,
        show_id: ShowId,
        operation: &str,
        holder: &str,
        stale_after: Duration,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let stale_cutoff = now.saturating_sub(i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            INSERT INTO show_leases (show_id, operation, holder, acquired_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(show_id) DO UPDATE
            SET operation = excluded.operation,
                holder = excluded.holder,
                acquired_at = excluded.acquired_at
            WHERE show_leases.acquired_at < ?
            "#,
        )
        .bind(show_id)
        .bind(operation)
        .bind(holder)
        .bind(now)
        .bind(stale_cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Error::ShowNotFound(show_id)
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to acquire show lease: {}",
                e
            ))),
        })?;

        if result.rows_affected() > 0 {
            tracing::debug!(show_id = %show_id, operation, holder, "Acquired show lease");
            return Ok(());
        }

        let current = self.get_show_lease(show_id).await?;
        let (operation, holder) = match current {
            Some(lease) => (lease.operation, lease.holder),
            // Released between the two statements; report what we tried to take
            None => (operation.to_string(), String::from("unknown")),
        };
        Err(Error::ShowBusy {
            show_id,
            operation,
            holder,
        })
    }

    /// Stamp the lease as fresh, only if `holder` still owns it
    ///
    /// Returns `false` when the lease was lost to another holder.
    pub async fn refresh_show_lease(&self, show_id: ShowId, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE show_leases SET acquired_at = ? WHERE show_id = ? AND holder = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(show_id)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to refresh show lease: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lease, only if `holder` still owns it
    ///
    /// Returns `false` when the lease was no longer held by `holder`.
    pub async fn release_show_lease(&self, show_id: ShowId, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM show_leases WHERE show_id = ? AND holder = ?")
            .bind(show_id)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to release show lease: {}",
                    e
                )))
            })?;

        let owned = result.rows_affected() > 0;
        tracing::debug!(show_id = %show_id, holder, owned, "Released show lease");
        Ok(owned)
    }

    /// Current lease on a show, if any
    pub async fn get_show_lease(&self, show_id: ShowId) -> Result<Option<ShowLease>> {
        let row = sqlx::query_as::<_, ShowLease>(
            "SELECT show_id, operation, holder, acquired_at FROM show_leases WHERE show_id = ?",
        )
        .bind(show_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get show lease: {}",
                e
            )))
        })?;

        Ok(row)
    }
}
