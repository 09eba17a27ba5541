//! Download batch orchestration -- bounded concurrent execution of a plan.

use crate::error::Result;
use crate::naming::purge_partials;
use crate::selector::EpisodeSelector;
use crate::types::{AssetKind, Event, ShowId, TaskOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::Archiver;
use super::download_task::{DownloadTask, DownloadTaskContext, run_download_task};
use super::planner::PlannedTask;
use super::report::BatchReport;

/// What a download batch should fetch
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Episodes to archive
    pub selector: EpisodeSelector,
    /// Re-read the feed before planning so new episodes are selectable (default: true)
    pub sync_feed: bool,
}

impl DownloadRequest {
    /// Request for `selector`, syncing the feed first
    pub fn new(selector: EpisodeSelector) -> Self {
        Self {
            selector,
            sync_feed: true,
        }
    }

    /// Plan against the stored episodes without re-reading the feed
    pub fn without_sync(mut self) -> Self {
        self.sync_feed = false;
        self
    }
}

impl Archiver {
    /// Archive the selected episodes of a show
    ///
    /// Holds the show's lease for the whole batch, so a scan of the same show
    /// fails with [`crate::Error::ShowBusy`] meanwhile. Cancelling `cancel`
    /// stops scheduling; running tasks finish and the rest are reported as
    /// `cancelled`. Individual task failures never abort the batch; they are
    /// in the returned report.
    pub async fn download(
        &self,
        show_id: ShowId,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        self.with_show_lease(show_id, "download", || {
            self.run_batch(show_id, request, cancel)
        })
        .await
    }

    async fn run_batch(
        &self,
        show_id: ShowId,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let mut show = self.db.require_show(show_id).await?;
        let show_dir = self.config.show_dir(show_id);
        tokio::fs::create_dir_all(&show_dir).await?;
        purge_partials(&show_dir).await?;

        if request.sync_feed {
            match self.sync_show_unlocked(&show).await {
                Ok(_) => show = self.db.require_show(show_id).await?,
                Err(e) => {
                    tracing::warn!(
                        show_id = %show_id,
                        error = %e,
                        "Feed sync failed, continuing with stored episodes"
                    );
                }
            }
        }

        let selection = request.selector.describe();
        self.write_snapshots(&show, &show_dir, &selection).await;

        let known = self.db.episode_numbers(show_id).await?;
        let selected = request.selector.resolve(&known);
        let plan = self.plan_batch(show_id, &show_dir, &selected).await?;

        tracing::info!(
            show_id = %show_id,
            selection = %selection,
            tasks = plan.len(),
            limit = self.config.general.max_parallel_downloads,
            "Starting download batch"
        );
        self.emit_event(Event::BatchStarted {
            show_id,
            tasks: plan.len(),
        });

        let outcomes = self.execute_plan(show_id, plan, &cancel).await;
        let report = BatchReport::new(show_id, selection, outcomes);

        tracing::info!(
            show_id = %show_id,
            unresolved = report.unresolved(),
            "Download batch finished"
        );
        self.emit_event(Event::BatchFinished {
            show_id,
            unresolved: report.unresolved(),
        });

        Ok(report)
    }

    /// Run every planned task to a terminal state, at most `max_parallel_downloads` at a time
    async fn execute_plan(
        &self,
        show_id: ShowId,
        plan: Vec<PlannedTask>,
        cancel: &CancellationToken,
    ) -> BTreeMap<(u32, AssetKind), TaskOutcome> {
        let limit = self.config.general.max_parallel_downloads;
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));

        // None marks a spawned task whose result hasn't arrived
        let mut outcomes: BTreeMap<(u32, AssetKind), Option<TaskOutcome>> = BTreeMap::new();
        let mut running = JoinSet::new();

        for planned in plan {
            let task = match planned {
                PlannedTask::Done {
                    episode,
                    kind,
                    outcome,
                } => {
                    self.finish_without_running(show_id, episode, kind, &outcome);
                    outcomes.insert((episode, kind), Some(outcome));
                    continue;
                }
                PlannedTask::Run(task) => task,
            };
            let key = (task.episode, task.kind);

            let permit = match &semaphore {
                None if cancel.is_cancelled() => Err(()),
                None => Ok(None),
                Some(semaphore) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(()),
                        permit = Arc::clone(semaphore).acquire_owned() => permit.map(Some).map_err(|_| ()),
                    }
                }
            };
            let Ok(permit) = permit else {
                self.finish_without_running(show_id, key.0, key.1, &TaskOutcome::Cancelled);
                outcomes.insert(key, Some(TaskOutcome::Cancelled));
                continue;
            };

            outcomes.insert(key, None);
            let ctx = self.task_context(task);
            running.spawn(async move {
                let _permit = permit;
                (key, run_download_task(ctx).await)
            });
        }

        if cancel.is_cancelled() {
            tracing::warn!(
                show_id = %show_id,
                in_flight = running.len(),
                "Batch cancelled, waiting for running tasks"
            );
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    outcomes.insert(key, Some(outcome));
                }
                Err(e) => {
                    tracing::error!(show_id = %show_id, error = %e, "Download task panicked");
                }
            }
        }

        outcomes
            .into_iter()
            .map(|(key, outcome)| {
                let outcome = outcome.unwrap_or_else(|| TaskOutcome::Failed {
                    code: "internal_error".to_string(),
                    message: "download task panicked".to_string(),
                });
                (key, outcome)
            })
            .collect()
    }

    pub(super) fn task_context(&self, task: DownloadTask) -> DownloadTaskContext {
        DownloadTaskContext {
            task,
            db: Arc::clone(&self.db),
            config: Arc::clone(&self.config),
            fetcher: Arc::clone(&self.fetcher),
            event_tx: self.event_tx.clone(),
        }
    }

    fn finish_without_running(
        &self,
        show_id: ShowId,
        episode: u32,
        kind: AssetKind,
        outcome: &TaskOutcome,
    ) {
        self.emit_event(Event::TaskFinished {
            show_id,
            episode,
            kind,
            outcome: outcome.clone(),
        });
    }
}
