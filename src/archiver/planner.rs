//! Turning an episode selection into download tasks.
//!
//! Each selected episode yields one task per asset kind: audio always, the
//! episode artwork when enabled and the feed declares one. With
//! `skip_existing_files`, assets already in the archive resolve to `skipped`
//! here without touching the network.

use crate::db::Episode;
use crate::error::Result;
use crate::feed::MediaSource;
use crate::naming::{HASH_DISPLAY_LEN, hash_file, parse_archive_filename};
use crate::reconcile::{ArchiveFile, list_archive_files};
use crate::types::{AssetKind, ShowId, StoredAsset, TaskOutcome};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Archiver;
use super::download_task::DownloadTask;

/// One entry of a batch plan
#[derive(Debug)]
pub(super) enum PlannedTask {
    /// Needs a download
    Run(DownloadTask),
    /// Already terminal before scheduling
    Done {
        episode: u32,
        kind: AssetKind,
        outcome: TaskOutcome,
    },
}

impl Archiver {
    /// Plan the tasks for `selected` (ascending) episode numbers of a show
    pub(super) async fn plan_batch(
        &self,
        show_id: ShowId,
        show_dir: &Path,
        selected: &[u32],
    ) -> Result<Vec<PlannedTask>> {
        let episodes: BTreeMap<u32, Episode> = self
            .db
            .list_episodes(show_id)
            .await?
            .into_iter()
            .map(|ep| (ep.number(), ep))
            .collect();
        let on_disk = if self.config.downloads.skip_existing_files {
            list_archive_files(show_dir).await?
        } else {
            Vec::new()
        };

        let mut plan = Vec::new();
        for &number in selected {
            let Some(episode) = episodes.get(&number) else {
                tracing::warn!(show_id = %show_id, episode = number, "Episode not found in show");
                plan.push(PlannedTask::Done {
                    episode: number,
                    kind: AssetKind::Audio,
                    outcome: TaskOutcome::EpisodeNotFound,
                });
                continue;
            };

            for kind in self.asset_kinds(episode) {
                if self.config.downloads.skip_existing_files
                    && let Some(path) = self.existing_asset(show_id, episode, kind, &on_disk).await?
                {
                    tracing::debug!(
                        show_id = %show_id,
                        episode = number,
                        kind = %kind,
                        path = %path.display(),
                        "Already archived, skipping"
                    );
                    plan.push(PlannedTask::Done {
                        episode: number,
                        kind,
                        outcome: TaskOutcome::Skipped { path },
                    });
                    continue;
                }

                plan.push(PlannedTask::Run(DownloadTask {
                    show_id,
                    episode: number,
                    kind,
                    sources: sources_for(episode, kind),
                    target_dir: show_dir.to_path_buf(),
                    duration_secs: episode.duration_secs.and_then(|d| u64::try_from(d).ok()),
                }));
            }
        }

        Ok(plan)
    }

    fn asset_kinds(&self, episode: &Episode) -> Vec<AssetKind> {
        let mut kinds = vec![AssetKind::Audio];
        if self.config.downloads.download_episode_images && episode.image_url.is_some() {
            kinds.push(AssetKind::Image);
        }
        kinds
    }

    /// Path of an asset that is already archived, adopting a matching file when the record lacks it
    async fn existing_asset(
        &self,
        show_id: ShowId,
        episode: &Episode,
        kind: AssetKind,
        on_disk: &[ArchiveFile],
    ) -> Result<Option<PathBuf>> {
        let number = episode.number();

        if let Some(asset) = episode.asset(kind)
            && recorded_file_is_present(&asset, number, kind).await
        {
            return Ok(Some(asset.path));
        }

        let candidates = on_disk
            .iter()
            .filter(|f| f.episode() == number && f.kind() == kind);
        for file in candidates {
            let digest = match hash_file(&file.path).await {
                Ok(digest) => digest,
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Could not hash archive file");
                    continue;
                }
            };
            // A name that doesn't match its content is drift for the reconciler, not a hit
            if !file.name.matches(&digest) {
                continue;
            }

            let asset = StoredAsset {
                path: file.path.clone(),
                hash: digest.hex,
                size: digest.size,
            };
            self.db.record_asset(show_id, number, kind, &asset).await?;
            tracing::info!(
                show_id = %show_id,
                episode = number,
                kind = %kind,
                path = %file.path.display(),
                "Adopted existing file into the archive record"
            );
            return Ok(Some(asset.path));
        }

        Ok(None)
    }
}

/// The recorded file exists and its name follows the scheme for this episode, kind and hash
async fn recorded_file_is_present(asset: &StoredAsset, episode: u32, kind: AssetKind) -> bool {
    let Some(name) = asset
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_archive_filename)
    else {
        return false;
    };
    if name.episode != episode || name.kind != kind {
        return false;
    }
    if asset.hash.len() < HASH_DISPLAY_LEN || !asset.hash.starts_with(&name.hash_prefix) {
        return false;
    }
    tokio::fs::try_exists(&asset.path).await.unwrap_or(false)
}

fn sources_for(episode: &Episode, kind: AssetKind) -> Vec<MediaSource> {
    match kind {
        AssetKind::Audio => episode.media_sources(),
        AssetKind::Image => episode
            .image_url
            .iter()
            .map(|url| MediaSource {
                url: url.clone(),
                content_type: None,
            })
            .collect(),
    }
}
