//! Batch result table.

use crate::types::{AssetKind, ShowId, TaskOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Terminal state of one task in a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Episode number
    pub episode: u32,
    /// Asset kind
    pub kind: AssetKind,
    /// Terminal state
    pub outcome: TaskOutcome,
}

/// Result of a download batch, ordered by episode number then asset kind
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    /// Archived show
    pub show_id: ShowId,
    /// Human summary of the selection
    pub selection: String,
    /// One entry per task
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub(crate) fn new(
        show_id: ShowId,
        selection: String,
        outcomes: BTreeMap<(u32, AssetKind), TaskOutcome>,
    ) -> Self {
        let entries = outcomes
            .into_iter()
            .map(|((episode, kind), outcome)| ReportEntry {
                episode,
                kind,
                outcome,
            })
            .collect();
        Self {
            show_id,
            selection,
            entries,
        }
    }

    /// Number of entries with the given [`TaskOutcome::label`]
    pub fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.label() == label)
            .count()
    }

    /// Tasks that did not leave their asset archived
    pub fn unresolved(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.outcome.is_resolved())
            .count()
    }

    /// True when every task was downloaded or skipped
    pub fn is_success(&self) -> bool {
        self.unresolved() == 0
    }

    /// Process exit code for this batch
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Entries whose file was placed but not recorded
    pub fn store_write_failures(&self) -> Vec<&ReportEntry> {
        self.entries
            .iter()
            .filter(|e| {
                matches!(&e.outcome, TaskOutcome::Failed { code, .. } if code == "store_write_error")
            })
            .collect()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Show {}: {}", self.show_id, self.selection)?;
        writeln!(f, "{:>8}  {:<6}  {:<18}  DETAIL", "EPISODE", "ASSET", "STATE")?;
        for entry in &self.entries {
            let detail = match &entry.outcome {
                TaskOutcome::Downloaded { path, size } => {
                    format!("{} ({} bytes)", display_name(path), size)
                }
                TaskOutcome::Skipped { path } => display_name(path),
                TaskOutcome::Failed { code, message } => format!("[{}] {}", code, message),
                TaskOutcome::EpisodeNotFound => "no such episode in this show".to_string(),
                TaskOutcome::Cancelled => "not started".to_string(),
            };
            writeln!(
                f,
                "{:>8}  {:<6}  {:<18}  {}",
                entry.episode,
                entry.kind,
                entry.outcome.label(),
                detail
            )?;
        }

        writeln!(
            f,
            "{} downloaded, {} skipped, {} failed, {} not found, {} cancelled",
            self.count("downloaded"),
            self.count("skipped"),
            self.count("failed"),
            self.count("episode_not_found"),
            self.count("cancelled"),
        )?;

        let unrecorded = self.store_write_failures();
        if !unrecorded.is_empty() {
            writeln!(
                f,
                "WARNING: {} file(s) were written but could not be recorded; run `scan {} --fix` to adopt them",
                unrecorded.len(),
                self.show_id
            )?;
        }
        Ok(())
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
