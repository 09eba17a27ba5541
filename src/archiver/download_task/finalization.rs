//! Download finalization -- record the terminal state on the episode row.

use crate::error::DownloadError;
use crate::types::{AssetKind, StoredAsset, TaskOutcome};

use super::context::DownloadTaskContext;

/// Record the task result and turn it into a [`TaskOutcome`].
///
/// A placed file whose record cannot be written is a `store_write_error`: the
/// file stays in place (the reconciler adopts it later) and the failure is
/// logged at error level.
pub(super) async fn finalize_task(
    ctx: &DownloadTaskContext,
    result: Result<StoredAsset, DownloadError>,
) -> TaskOutcome {
    let task = &ctx.task;

    let error = match result {
        Ok(asset) => match ctx
            .db
            .record_asset(task.show_id, task.episode, task.kind, &asset)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    show_id = %task.show_id,
                    episode = task.episode,
                    kind = %task.kind,
                    path = %asset.path.display(),
                    size = asset.size,
                    "Archived"
                );
                return TaskOutcome::Downloaded {
                    path: asset.path,
                    size: asset.size,
                };
            }
            Err(e) => {
                tracing::error!(
                    show_id = %task.show_id,
                    episode = task.episode,
                    kind = %task.kind,
                    path = %asset.path.display(),
                    error = %e,
                    "File placed but episode record could not be updated"
                );
                DownloadError::StoreWrite {
                    path: asset.path,
                    message: e.to_string(),
                }
            }
        },
        Err(e) => e,
    };

    tracing::warn!(
        show_id = %task.show_id,
        episode = task.episode,
        kind = %task.kind,
        error_code = error.error_code(),
        error = %error,
        "Download task failed"
    );

    // Episode status tracks the audio; image failures only show up in the report
    if task.kind == AssetKind::Audio
        && !matches!(error, DownloadError::StoreWrite { .. })
        && let Err(e) = ctx
            .db
            .mark_episode_failed(task.show_id, task.episode, error.error_code(), &error.to_string())
            .await
    {
        tracing::error!(
            show_id = %task.show_id,
            episode = task.episode,
            error = %e,
            "Failed to record download failure"
        );
    }

    TaskOutcome::Failed {
        code: error.error_code().to_string(),
        message: error.to_string(),
    }
}
