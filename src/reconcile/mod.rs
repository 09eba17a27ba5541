//! Archive reconciliation.
//!
//! A scan compares every episode record of a show with the files in its
//! directory and classifies each disagreement (see [`DiscrepancyKind`]).
//! Depending on the [`ScanMode`] it then repairs the database from the disk
//! and deletes leftover orphans.
//!
//! - [`observe`] - Listing and hashing the files that follow the naming scheme
//! - [`classify`] - Pure diff of records against observed files
//! - [`apply`] - Fix and force actions

mod apply;
mod classify;
mod observe;


pub use apply::Resolution;
pub use classify::{Discrepancy, DiscrepancyKind, classify};
pub use observe::{ArchiveFile, ObservedFile, list_archive_files, observe_show_dir};

use crate::archiver::Archiver;
use crate::error::{Error, Result};
use crate::types::ShowId;
use std::fmt;

/// What a scan may change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Report discrepancies, change nothing
    ReportOnly,
    /// Repair the database from the disk
    Fix,
    /// Repair, then delete orphans the repair could not place
    FixForce,
}

impl ScanMode {
    /// Mode for the `--fix` and `--force` flags; `--force` alone is a usage error
    pub fn from_flags(fix: bool, force: bool) -> Result<Self> {
        match (fix, force) {
            (false, false) => Ok(ScanMode::ReportOnly),
            (true, false) => Ok(ScanMode::Fix),
            (true, true) => Ok(ScanMode::FixForce),
            (false, true) => Err(Error::Usage(
                "--force deletes orphans after the fix pass and requires --fix".to_string(),
            )),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ScanMode::ReportOnly => "scan",
            ScanMode::Fix => "scan --fix",
            ScanMode::FixForce => "scan --fix --force",
        }
    }
}

/// A discrepancy with what the scan did about it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    /// The disagreement found
    pub discrepancy: Discrepancy,
    /// Action taken, `None` when it remains
    pub resolution: Option<Resolution>,
}

/// Result of a scan
#[derive(Clone, Debug)]
pub struct ScanReport {
    /// Scanned show
    pub show_id: ShowId,
    /// Requested mode
    pub mode: ScanMode,
    /// Archive files examined
    pub files_checked: usize,
    /// Every discrepancy found, ordered by episode then asset kind
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    /// Discrepancies left after the requested action
    pub fn remaining(&self) -> usize {
        self.entries.iter().filter(|e| e.resolution.is_none()).count()
    }

    /// Discrepancies that were resolved
    pub fn resolved(&self) -> usize {
        self.entries.len() - self.remaining()
    }

    /// Number of discrepancies of one kind
    pub fn count(&self, kind: DiscrepancyKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.discrepancy.kind == kind)
            .count()
    }

    /// True when nothing remains unresolved
    pub fn is_clean(&self) -> bool {
        self.remaining() == 0
    }

    /// Process exit code for this scan
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() { 0 } else { 1 }
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Show {}: {} ({} files checked)",
            self.show_id,
            self.mode.label(),
            self.files_checked
        )?;
        if self.entries.is_empty() {
            return writeln!(f, "No discrepancies");
        }

        writeln!(
            f,
            "{:>8}  {:<6}  {:<14}  {:<32}  RESOLUTION",
            "EPISODE", "ASSET", "DISCREPANCY", "FILE"
        )?;
        for entry in &self.entries {
            let d = &entry.discrepancy;
            let resolution = match entry.resolution {
                Some(resolution) => resolution.to_string(),
                None if d.kind == DiscrepancyKind::OrphanFile && self.mode == ScanMode::Fix => {
                    "remains (use --force to delete)".to_string()
                }
                None => "remains".to_string(),
            };
            writeln!(
                f,
                "{:>8}  {:<6}  {:<14}  {:<32}  {}",
                d.episode,
                d.asset,
                d.kind,
                d.file_name(),
                resolution
            )?;
        }

        writeln!(
            f,
            "{} missing, {} orphaned, {} mismatched; {} resolved, {} remaining",
            self.count(DiscrepancyKind::MissingFile),
            self.count(DiscrepancyKind::OrphanFile),
            self.count(DiscrepancyKind::HashMismatch),
            self.resolved(),
            self.remaining()
        )
    }
}

impl Archiver {
    /// Compare a show's records with its directory and optionally repair them
    ///
    /// Holds the show's lease, so it fails with [`Error::ShowBusy`] while a
    /// download batch for the show is running.
    pub async fn scan_show(&self, show_id: ShowId, mode: ScanMode) -> Result<ScanReport> {
        self.db.require_show(show_id).await?;
        self.with_show_lease(show_id, "scan", || async {
            let show_dir = self.config.show_dir(show_id);
            let episodes = self.db.list_episodes(show_id).await?;
            let observed = observe_show_dir(&show_dir).await?;
            let found = classify(&episodes, &observed);

            let resolutions = match mode {
                ScanMode::ReportOnly => vec![None; found.len()],
                ScanMode::Fix => self.apply_fixes(show_id, &found, false).await?,
                ScanMode::FixForce => self.apply_fixes(show_id, &found, true).await?,
            };

            let report = ScanReport {
                show_id,
                mode,
                files_checked: observed.len(),
                entries: found
                    .into_iter()
                    .zip(resolutions)
                    .map(|(discrepancy, resolution)| ScanEntry {
                        discrepancy,
                        resolution,
                    })
                    .collect(),
            };

            if report.entries.is_empty() {
                tracing::info!(show_id = %show_id, files = report.files_checked, "Archive is consistent");
            } else {
                tracing::info!(
                    show_id = %show_id,
                    mode = mode.label(),
                    found = report.entries.len(),
                    resolved = report.resolved(),
                    remaining = report.remaining(),
                    "Scan finished"
                );
            }
            Ok(report)
        })
        .await
    }
}
