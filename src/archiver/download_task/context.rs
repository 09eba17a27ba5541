//! Download task context -- task description and the handles a task needs.

use crate::config::Config;
use crate::db::Database;
use crate::feed::MediaSource;
use crate::fetch::Fetcher;
use crate::types::{AssetKind, Event, ShowId, TaskOutcome};
use std::path::PathBuf;
use std::sync::Arc;

/// One asset of one episode to fetch into the archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Show the episode belongs to
    pub show_id: ShowId,
    /// Episode number
    pub episode: u32,
    /// Which asset
    pub kind: AssetKind,
    /// Candidate URLs, in feed order (audio may have alternates)
    pub sources: Vec<MediaSource>,
    /// Show directory the file lands in
    pub target_dir: PathBuf,
    /// Declared duration, used to estimate bitrate when the bytes don't tell
    pub duration_secs: Option<u64>,
}

/// Shared context for a single download task, reducing parameter passing between helpers.
pub(crate) struct DownloadTaskContext {
    pub(crate) task: DownloadTask,
    pub(crate) db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl DownloadTaskContext {
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(super) fn emit_started(&self) {
        self.emit(Event::TaskStarted {
            show_id: self.task.show_id,
            episode: self.task.episode,
            kind: self.task.kind,
        });
    }

    pub(super) fn emit_retrying(&self, attempt: u32, error: String) {
        self.emit(Event::TaskRetrying {
            show_id: self.task.show_id,
            episode: self.task.episode,
            kind: self.task.kind,
            attempt,
            error,
        });
    }

    pub(crate) fn emit_finished(&self, outcome: &TaskOutcome) {
        self.emit(Event::TaskFinished {
            show_id: self.task.show_id,
            episode: self.task.episode,
            kind: self.task.kind,
            outcome: outcome.clone(),
        });
    }
}
