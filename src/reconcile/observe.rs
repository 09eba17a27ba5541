//! Observed filesystem state of a show directory.

use crate::naming::{ArchiveName, ContentDigest, hash_file, parse_archive_filename};
use crate::types::AssetKind;
use std::path::{Path, PathBuf};

/// A file in a show directory that follows the archive naming scheme
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Full path
    pub path: PathBuf,
    /// Parsed filename
    pub name: ArchiveName,
    /// Size in bytes
    pub size: u64,
}

impl ArchiveFile {
    /// Episode number from the filename
    pub fn episode(&self) -> u32 {
        self.name.episode
    }

    /// Asset kind from the extension
    pub fn kind(&self) -> AssetKind {
        self.name.kind
    }

    /// Filename as a string
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An archive file together with the digest of its current contents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedFile {
    /// The file
    pub file: ArchiveFile,
    /// Digest of the bytes on disk
    pub digest: ContentDigest,
}

/// Archive files directly inside `show_dir`, sorted by filename
///
/// Snapshots (`feed.xml`, `metadata.json`, `cover.*`), the `.partial/` staging
/// area and anything else outside the naming scheme are ignored. A missing
/// directory has no files.
pub async fn list_archive_files(show_dir: &Path) -> std::io::Result<Vec<ArchiveFile>> {
    let mut entries = match tokio::fs::read_dir(show_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(parse_archive_filename) else {
            continue;
        };
        files.push(ArchiveFile {
            path: entry.path(),
            name,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// List and hash every archive file in `show_dir`
pub async fn observe_show_dir(show_dir: &Path) -> std::io::Result<Vec<ObservedFile>> {
    let files = list_archive_files(show_dir).await?;
    let mut observed = Vec::with_capacity(files.len());
    for file in files {
        let digest = hash_file(&file.path).await?;
        observed.push(ObservedFile { file, digest });
    }
    Ok(observed)
}
