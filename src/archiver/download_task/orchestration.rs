//! Download task orchestration -- top-level lifecycle for a single asset.

use crate::error::DownloadError;
use crate::types::{AssetKind, StoredAsset, TaskOutcome};

use super::context::DownloadTaskContext;
use super::finalization::finalize_task;
use super::quality::{check_quality, estimate_bitrate_kbps};
use super::transfer::{Fetched, fetch_with_retry, order_candidates};

/// Core download task -- runs one (episode, asset kind) to a terminal state.
///
/// Phases:
/// 1. Order candidate URLs by preferred format
/// 2. Fetch each candidate (with retries) until one passes the checks
/// 3. Place the file under its content-addressed name
/// 4. Record the result on the episode row
pub(crate) async fn run_download_task(ctx: DownloadTaskContext) -> TaskOutcome {
    ctx.emit_started();

    let result = fetch_and_place(&ctx).await;
    let outcome = finalize_task(&ctx, result).await;

    ctx.emit_finished(&outcome);
    outcome
}

async fn fetch_and_place(ctx: &DownloadTaskContext) -> Result<StoredAsset, DownloadError> {
    let task = &ctx.task;
    let candidates = match task.kind {
        AssetKind::Audio => order_candidates(&task.sources, &ctx.config.preferred_formats()),
        AssetKind::Image => task.sources.clone(),
    };

    let mut last_error = None;
    for (index, source) in candidates.iter().enumerate() {
        let has_next = index + 1 < candidates.len();
        match fetch_candidate(ctx, source).await {
            Ok(asset) => return Ok(asset),
            Err(e) if has_next && moves_to_next_candidate(&e) => {
                tracing::warn!(
                    show_id = %task.show_id,
                    episode = task.episode,
                    kind = %task.kind,
                    url = %source.url,
                    error = %e,
                    "Candidate failed, trying next format"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| DownloadError::NoSource {
        episode: task.episode,
        kind: task.kind.to_string(),
    }))
}

async fn fetch_candidate(
    ctx: &DownloadTaskContext,
    source: &crate::feed::MediaSource,
) -> Result<StoredAsset, DownloadError> {
    let task = &ctx.task;
    let Fetched {
        staged,
        digest,
        extension,
        head,
    } = fetch_with_retry(ctx, source).await?;

    if task.kind == AssetKind::Audio {
        let bitrate = estimate_bitrate_kbps(&extension, &head, digest.size, task.duration_secs);
        check_quality(ctx.config.downloads.min_audio_quality, bitrate)?;
    }

    let placement = staged
        .place(&task.target_dir, task.episode, &digest, &extension)
        .await?;
    if placement.reused {
        tracing::debug!(
            show_id = %task.show_id,
            episode = task.episode,
            path = %placement.path.display(),
            "Reusing identical file already in place"
        );
    }

    Ok(StoredAsset {
        path: placement.path,
        hash: digest.hex,
        size: digest.size,
    })
}

/// Failures tied to one URL; local failures (disk, collisions) stop the task
fn moves_to_next_candidate(error: &DownloadError) -> bool {
    matches!(
        error,
        DownloadError::Fetch(_)
            | DownloadError::TransientFetch { .. }
            | DownloadError::QualityRejected { .. }
            | DownloadError::MalformedContent { .. }
    )
}
