//! Diffing episode records against the files on disk.

use crate::db::Episode;
use crate::types::{AssetKind, StoredAsset};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::observe::ObservedFile;

/// How a record and the disk disagree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Asset recorded as archived, no file for it
    MissingFile,
    /// File with no record referencing it
    OrphanFile,
    /// Recorded hash or path disagrees with the file on disk
    HashMismatch,
}

impl DiscrepancyKind {
    /// Stable name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::MissingFile => "missing_file",
            DiscrepancyKind::OrphanFile => "orphan_file",
            DiscrepancyKind::HashMismatch => "hash_mismatch",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One disagreement between the database and a show directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrepancy {
    /// Episode number (from the record or the filename)
    pub episode: u32,
    /// Asset kind
    pub asset: AssetKind,
    /// Classification
    pub kind: DiscrepancyKind,
    /// What the record says
    pub recorded: Option<StoredAsset>,
    /// What is on disk
    pub observed: Option<ObservedFile>,
    /// Orphan whose episode exists and has no asset of this kind recorded
    pub adoptable: bool,
}

impl Discrepancy {
    /// Filename the discrepancy is about
    pub fn file_name(&self) -> String {
        if let Some(observed) = &self.observed {
            return observed.file.file_name();
        }
        self.recorded
            .as_ref()
            .and_then(|r| r.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn orphan(episode: u32, asset: AssetKind, file: &ObservedFile, adoptable: bool) -> Self {
        Self {
            episode,
            asset,
            kind: DiscrepancyKind::OrphanFile,
            recorded: None,
            observed: Some(file.clone()),
            adoptable,
        }
    }
}

/// Classify every (episode, asset kind) slot of a show
///
/// Output is ordered by episode, then asset kind, then filename.
pub fn classify(episodes: &[Episode], observed: &[ObservedFile]) -> Vec<Discrepancy> {
    let records: BTreeMap<u32, &Episode> = episodes.iter().map(|ep| (ep.number(), ep)).collect();

    let mut files: BTreeMap<(u32, AssetKind), Vec<&ObservedFile>> = BTreeMap::new();
    for file in observed {
        files
            .entry((file.file.episode(), file.file.kind()))
            .or_default()
            .push(file);
    }
    for group in files.values_mut() {
        group.sort_by(|a, b| a.file.path.cmp(&b.file.path));
    }

    let mut slots: BTreeSet<(u32, AssetKind)> = files.keys().copied().collect();
    for episode in episodes {
        for kind in [AssetKind::Audio, AssetKind::Image] {
            if episode.asset(kind).is_some() {
                slots.insert((episode.number(), kind));
            }
        }
    }

    let mut found = Vec::new();
    for (episode, asset) in slots {
        let group = files.remove(&(episode, asset)).unwrap_or_default();
        let record = records.get(&episode);
        let recorded = record.and_then(|ep| ep.asset(asset));
        classify_slot(episode, asset, record.is_some(), recorded, &group, &mut found);
    }
    found
}

fn classify_slot(
    episode: u32,
    asset: AssetKind,
    has_record: bool,
    recorded: Option<StoredAsset>,
    group: &[&ObservedFile],
    found: &mut Vec<Discrepancy>,
) {
    let Some(recorded) = recorded else {
        // Only one file can fill an empty slot
        for (index, file) in group.iter().enumerate() {
            found.push(Discrepancy::orphan(
                episode,
                asset,
                file,
                has_record && index == 0,
            ));
        }
        return;
    };

    if group.is_empty() {
        found.push(Discrepancy {
            episode,
            asset,
            kind: DiscrepancyKind::MissingFile,
            recorded: Some(recorded),
            observed: None,
            adoptable: false,
        });
        return;
    }

    let exact = group
        .iter()
        .position(|f| f.file.path == recorded.path && f.digest.hex == recorded.hash);
    let candidate = exact
        .or_else(|| group.iter().position(|f| f.digest.hex == recorded.hash))
        .unwrap_or(0);

    if exact.is_none() {
        found.push(Discrepancy {
            episode,
            asset,
            kind: DiscrepancyKind::HashMismatch,
            recorded: Some(recorded),
            observed: Some(group[candidate].clone()),
            adoptable: false,
        });
    }
    for (index, file) in group.iter().enumerate() {
        if index != candidate {
            found.push(Discrepancy::orphan(episode, asset, file, false));
        }
    }
}
