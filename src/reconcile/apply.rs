//! Corrective actions for `--fix` and `--force`.
//!
//! The fix pass trusts the disk: a missing file resets the record, a
//! mismatching file becomes the record, and an orphan that fits an empty slot
//! is adopted. Deletion happens only afterwards and only for orphans the fix
//! pass could not place.

use crate::error::Result;
use crate::types::{AssetKind, ShowId, StoredAsset};
use serde::Serialize;
use std::fmt;

use super::classify::{Discrepancy, DiscrepancyKind};
use super::observe::ObservedFile;
use crate::archiver::Archiver;

/// What was done about a discrepancy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Record reset to not archived
    RecordReset,
    /// Record now points at the observed file
    RecordUpdated,
    /// Orphan adopted into its episode's record
    Adopted,
    /// Orphan deleted from disk
    Deleted,
}

impl Resolution {
    /// Short description for reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::RecordReset => "record reset",
            Resolution::RecordUpdated => "record updated",
            Resolution::Adopted => "adopted",
            Resolution::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Archiver {
    /// Apply the fix pass, then with `delete_orphans` remove what is left
    ///
    /// Returns one resolution slot per discrepancy, in the same order.
    pub(super) async fn apply_fixes(
        &self,
        show_id: ShowId,
        found: &[Discrepancy],
        delete_orphans: bool,
    ) -> Result<Vec<Option<Resolution>>> {
        let mut resolutions = Vec::with_capacity(found.len());
        for discrepancy in found {
            resolutions.push(self.fix_one(show_id, discrepancy).await?);
        }

        if delete_orphans {
            for (discrepancy, resolution) in found.iter().zip(resolutions.iter_mut()) {
                if resolution.is_some() || discrepancy.kind != DiscrepancyKind::OrphanFile {
                    continue;
                }
                let Some(observed) = &discrepancy.observed else {
                    continue;
                };
                match tokio::fs::remove_file(&observed.file.path).await {
                    Ok(()) => {
                        tracing::warn!(
                            show_id = %show_id,
                            episode = discrepancy.episode,
                            path = %observed.file.path.display(),
                            "Deleted orphan file"
                        );
                        *resolution = Some(Resolution::Deleted);
                    }
                    Err(e) => {
                        tracing::error!(
                            show_id = %show_id,
                            path = %observed.file.path.display(),
                            error = %e,
                            "Failed to delete orphan file"
                        );
                    }
                }
            }
        }

        Ok(resolutions)
    }

    async fn fix_one(
        &self,
        show_id: ShowId,
        discrepancy: &Discrepancy,
    ) -> Result<Option<Resolution>> {
        let episode = discrepancy.episode;
        let kind = discrepancy.asset;

        let resolution = match (discrepancy.kind, &discrepancy.observed) {
            (DiscrepancyKind::MissingFile, _) => {
                self.db.clear_asset(show_id, episode, kind).await?;
                Resolution::RecordReset
            }
            (DiscrepancyKind::HashMismatch, Some(observed)) => {
                self.db
                    .record_asset(show_id, episode, kind, &stored(observed))
                    .await?;
                Resolution::RecordUpdated
            }
            (DiscrepancyKind::OrphanFile, Some(observed)) if discrepancy.adoptable => {
                self.db
                    .record_asset(show_id, episode, kind, &stored(observed))
                    .await?;
                Resolution::Adopted
            }
            _ => return Ok(None),
        };

        tracing::info!(
            show_id = %show_id,
            episode,
            kind = %kind,
            discrepancy = %discrepancy.kind,
            resolution = %resolution,
            "Fixed discrepancy"
        );
        if kind == AssetKind::Audio && resolution == Resolution::RecordReset {
            tracing::warn!(
                show_id = %show_id,
                episode,
                "Archived audio is gone; the episode will be downloaded again by the next batch"
            );
        }
        Ok(Some(resolution))
    }
}

fn stored(observed: &ObservedFile) -> StoredAsset {
    StoredAsset {
        path: observed.file.path.clone(),
        hash: observed.digest.hex.clone(),
        size: observed.digest.size,
    }
}
