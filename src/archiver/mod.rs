//! Archive engine split into focused submodules.
//!
//! The `Archiver` struct and its methods are organized by domain:
//! - [`shows`] - Show registration, feed sync, listing and deletion
//! - [`snapshot`] - `feed.xml`, `metadata.json` and cover image next to the archive
//! - [`planner`] - Turning a selection into tasks, skip-existing and adoption
//! - [`orchestrator`] - Bounded concurrent batch execution and cancellation
//! - [`report`] - Batch result table and exit status
//! - [`download_task`] - Fetching, checking and placing one asset

mod download_task;
mod orchestrator;
mod planner;
mod report;
mod shows;
mod snapshot;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use download_task::DownloadTask;
pub use orchestrator::DownloadRequest;
pub use report::{BatchReport, ReportEntry};
pub use shows::{EpisodeSummary, SyncSummary};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::types::{Event, ShowId};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Main archiver instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Archiver {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to inspect episode state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Remote fetcher shared by feed loading and download tasks
    pub(crate) fetcher: Arc<dyn Fetcher>,
}

impl Archiver {
    /// Create a new Archiver using the HTTP fetcher built from `config`
    ///
    /// Validates the configuration, creates the archive root, opens (and migrates)
    /// the database.
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::with_fetcher(config, fetcher).await
    }

    /// Create a new Archiver with a custom [`Fetcher`]
    pub async fn with_fetcher(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.general.download_directory)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.general.download_directory.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.database.path).await?;

        // Buffer of 1000 events; slow subscribers see RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::debug!(
            download_directory = %config.general.download_directory.display(),
            database = %config.database.path.display(),
            "Archiver initialized"
        );

        Ok(Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            fetcher,
        })
    }

    /// Subscribe to archive events
    ///
    /// Each subscriber receives all events independently.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Run `operation` while holding the show's lease
    ///
    /// A background heartbeat refreshes the lease while `body` runs, so only a
    /// holder that stopped working can be taken over. The lease is released
    /// whether the operation succeeds or not. Fails with [`Error::ShowBusy`]
    /// when a download batch or scan already holds it.
    pub(crate) async fn with_show_lease<T, F, Fut>(
        &self,
        show_id: ShowId,
        operation: &str,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let holder = lease_holder();
        let lease_timeout = self.config.database.lease_timeout;
        self.db
            .acquire_show_lease(show_id, operation, &holder, lease_timeout)
            .await?;

        // Stops the heartbeat even when this future is dropped mid-body
        let stop = CancellationToken::new();
        let stop_guard = stop.clone().drop_guard();
        tokio::spawn(lease_heartbeat(
            Arc::clone(&self.db),
            show_id,
            operation.to_string(),
            holder.clone(),
            lease_timeout / 3,
            stop,
        ));

        let result = body().await;
        drop(stop_guard);

        match self.db.release_show_lease(show_id, &holder).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    show_id = %show_id,
                    operation,
                    "Show lease was taken over before the operation finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    show_id = %show_id,
                    operation,
                    error = %e,
                    "Failed to release show lease; it will expire after the lease timeout"
                );
            }
        }

        result
    }
}

/// Keep a held lease fresh until stopped or until the lease is lost
async fn lease_heartbeat(
    db: Arc<Database>,
    show_id: ShowId,
    operation: String,
    holder: String,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(50)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; the lease was just stamped
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match db.refresh_show_lease(show_id, &holder).await {
            Ok(true) => {
                tracing::trace!(show_id = %show_id, operation = %operation, "Refreshed show lease");
            }
            Ok(false) if stop.is_cancelled() => return,
            Ok(false) => {
                tracing::error!(
                    show_id = %show_id,
                    operation = %operation,
                    "Show lease lost to another holder"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    show_id = %show_id,
                    operation = %operation,
                    error = %e,
                    "Failed to refresh show lease"
                );
            }
        }
    }
}

/// Unique lease holder id: process id plus a random suffix per acquisition
fn lease_holder() -> String {
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{}:{:08x}", std::process::id(), suffix)
}
