//! Candidate ordering and streaming a response into the staging area.

use crate::error::DownloadError;
use crate::feed::MediaSource;
use crate::fetch::next_chunk;
use crate::naming::{
    ContentDigest, StagedFile, extension_for, extension_from_content_type, extension_from_url,
};
use crate::retry::{IsRetryable, retry_with_notify};
use crate::types::AssetKind;
use std::path::Path;

use super::context::DownloadTaskContext;

/// Bytes kept in memory from the start of a body, enough for container headers and ID3 tags
const HEAD_BYTES: usize = 64 * 1024;

/// A complete body sitting in the staging area
pub(super) struct Fetched {
    pub(super) staged: StagedFile,
    pub(super) digest: ContentDigest,
    pub(super) extension: String,
    pub(super) head: Vec<u8>,
}

/// Order audio candidates by the position of their format in `preferred`
///
/// Formats not in the list keep their feed order after the preferred ones.
pub(super) fn order_candidates(sources: &[MediaSource], preferred: &[String]) -> Vec<MediaSource> {
    let mut ranked: Vec<(usize, usize, &MediaSource)> = sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let rank = source_format(source)
                .and_then(|format| preferred.iter().position(|p| *p == format))
                .unwrap_or(preferred.len());
            (rank, index, source)
        })
        .collect();
    ranked.sort_by_key(|(rank, index, _)| (*rank, *index));
    ranked.into_iter().map(|(_, _, source)| source.clone()).collect()
}

fn source_format(source: &MediaSource) -> Option<String> {
    source
        .content_type
        .as_deref()
        .and_then(|ct| extension_from_content_type(AssetKind::Audio, ct))
        .map(str::to_string)
        .or_else(|| extension_from_url(&source.url))
}

/// Fetch `source`, retrying transient failures per the configured policy
///
/// Transient failures that outlast every retry come back as
/// [`DownloadError::TransientFetch`].
pub(super) async fn fetch_with_retry(
    ctx: &DownloadTaskContext,
    source: &MediaSource,
) -> Result<Fetched, DownloadError> {
    let retry = ctx.config.downloads.retry_config();
    let mut retries = 0;

    let result = retry_with_notify(
        &retry,
        || fetch_once(ctx, source),
        |attempt, error: &DownloadError| {
            retries = attempt;
            ctx.emit_retrying(attempt, error.to_string());
        },
    )
    .await;

    match result {
        Err(DownloadError::Fetch(e)) if e.is_retryable() => Err(DownloadError::TransientFetch {
            attempts: retries + 1,
            source: e,
        }),
        other => other,
    }
}

/// One attempt: stream the body into a fresh staging file while hashing it
async fn fetch_once(
    ctx: &DownloadTaskContext,
    source: &MediaSource,
) -> Result<Fetched, DownloadError> {
    let task = &ctx.task;
    let url = source.url.as_str();
    let read_timeout = ctx.config.general.read_timeout;

    let mut response = ctx.fetcher.fetch(url).await.map_err(DownloadError::Fetch)?;

    let content_type = response.content_type.clone().or(source.content_type.clone());
    if content_type
        .as_deref()
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("text/html"))
    {
        return Err(DownloadError::MalformedContent {
            url: url.to_string(),
            reason: "server returned an HTML page".to_string(),
        });
    }

    let mut staged = StagedFile::create(&task.target_dir)
        .await
        .map_err(|e| staging_error(&task.target_dir, e))?;
    let staging_path = staged.path().to_path_buf();

    let mut head = Vec::new();
    while let Some(chunk) = next_chunk(&mut response.body, read_timeout, url)
        .await
        .map_err(DownloadError::Fetch)?
    {
        if head.len() < HEAD_BYTES {
            let take = (HEAD_BYTES - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        staged
            .write(&chunk)
            .await
            .map_err(|e| staging_error(&staging_path, e))?;
    }

    if let Some(expected) = response.content_length
        && staged.size() < expected
    {
        return Err(DownloadError::Fetch(crate::error::FetchError::Interrupted {
            url: url.to_string(),
            message: format!("expected {} bytes, received {}", expected, staged.size()),
        }));
    }
    if staged.size() == 0 {
        return Err(DownloadError::MalformedContent {
            url: url.to_string(),
            reason: "empty body".to_string(),
        });
    }

    let digest = staged
        .seal()
        .await
        .map_err(|e| staging_error(&staging_path, e))?;
    let extension = extension_for(task.kind, content_type.as_deref(), url);

    tracing::debug!(
        show_id = %task.show_id,
        episode = task.episode,
        kind = %task.kind,
        url,
        size = digest.size,
        "Transfer complete"
    );

    Ok(Fetched {
        staged,
        digest,
        extension,
        head,
    })
}

fn staging_error(path: &Path, e: std::io::Error) -> DownloadError {
    DownloadError::Staging {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
