//! # parchive
//!
//! Podcast archiver that keeps a database of shows and episodes in verifiable
//! agreement with a directory tree of downloaded files.
//!
//! ## Design Philosophy
//!
//! - **Content-addressed files** - Every asset is stored as `{episode}_{hash}.{ext}`,
//!   so identical bytes always land under the same name
//! - **Idempotent re-runs** - Assets already archived are skipped without network access
//! - **Drift is detectable** - [`Archiver::scan_show`] diffs records against the disk
//!   and repairs the database from it on request
//! - **Event-driven** - Consumers subscribe to [`Event`]s, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use parchive::{Archiver, Config, DownloadRequest, EpisodeSelector};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let archiver = Archiver::new(Config::default()).await?;
//!
//!     let show = archiver.add_show("https://example.com/feed.xml").await?;
//!     let request = DownloadRequest::new(EpisodeSelector::parse("1-5,10")?);
//!     let report = archiver
//!         .download(show.show_id, &request, CancellationToken::new())
//!         .await?;
//!
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive engine: show management, download batches
pub mod archiver;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Podcast feed parsing
pub mod feed;
/// Remote fetching
pub mod fetch;
/// Content-addressed file naming and staging
pub mod naming;
/// Archive scan and repair
pub mod reconcile;
/// Retry logic with backoff
pub mod retry;
/// Episode range selection
pub mod selector;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archiver::{
    Archiver, BatchReport, DownloadRequest, DownloadTask, EpisodeSummary, ReportEntry, SyncSummary,
};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, DownloadError, Error, FetchError, Result, ToExitCode};
pub use reconcile::{Discrepancy, DiscrepancyKind, Resolution, ScanMode, ScanReport};
pub use selector::EpisodeSelector;
pub use types::{AssetKind, DownloadStatus, Event, ShowId, TaskOutcome};

/// Wait for a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let cancel = CancellationToken::new();
/// let trigger = cancel.clone();
/// tokio::spawn(async move {
///     parchive::wait_for_signal().await;
///     trigger.cancel();
/// });
/// # }
/// ```
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
