//! Content-addressed file naming and staging.
//!
//! Every archived asset is named `{episode_number}_{hash}.{ext}` where `hash` is the
//! first [`HASH_DISPLAY_LEN`] hex characters of the SHA-256 of the file contents.
//! Bytes are streamed into `<show_dir>/.partial/` while being hashed, and only
//! renamed to their final name once complete, so a final name never points at a
//! truncated file.

use crate::error::DownloadError;
use crate::types::AssetKind;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Number of hex characters of the digest used in filenames
pub const HASH_DISPLAY_LEN: usize = 16;

/// Directory (inside a show directory) holding in-flight downloads
pub const PARTIAL_DIR: &str = ".partial";

/// Audio extensions the archive recognises
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "aac", "opus", "flac", "wav"];

/// Image extensions the archive recognises
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif"];

const READ_BUFFER: usize = 64 * 1024;

/// Completed content digest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDigest {
    /// Full lowercase hex SHA-256
    pub hex: String,
    /// Number of bytes hashed
    pub size: u64,
}

impl ContentDigest {
    /// Hash segment used in filenames
    pub fn display_hash(&self) -> &str {
        &self.hex[..HASH_DISPLAY_LEN]
    }
}

/// Streaming SHA-256 accumulator
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    size: u64,
}

impl ContentHasher {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Finish hashing
    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            hex: format!("{:x}", self.hasher.finalize()),
            size: self.size,
        }
    }
}

/// Digest of an in-memory buffer
pub fn digest_bytes(bytes: &[u8]) -> ContentDigest {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finish()
}

/// Digest of a file on disk, read in chunks
pub async fn hash_file(path: &Path) -> std::io::Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Filename for an episode asset with the given digest
pub fn archive_filename(episode: u32, digest: &ContentDigest, extension: &str) -> String {
    format!("{}_{}.{}", episode, digest.display_hash(), extension)
}

/// A filename that follows the archive naming scheme
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveName {
    /// Episode number
    pub episode: u32,
    /// Hash segment (lowercase hex, [`HASH_DISPLAY_LEN`] chars)
    pub hash_prefix: String,
    /// Extension without the dot
    pub extension: String,
    /// Asset kind implied by the extension
    pub kind: AssetKind,
}

impl ArchiveName {
    /// True when `digest` has this file's hash segment
    pub fn matches(&self, digest: &ContentDigest) -> bool {
        digest.hex.starts_with(&self.hash_prefix)
    }
}

/// Recognise `{episode}_{hash}.{ext}`; anything else returns `None`
pub fn parse_archive_filename(name: &str) -> Option<ArchiveName> {
    let (stem, extension) = name.rsplit_once('.')?;
    let (episode, hash) = stem.split_once('_')?;

    if episode.is_empty() || !episode.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if hash.len() != HASH_DISPLAY_LEN
        || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }

    let kind = kind_for_extension(extension)?;
    Some(ArchiveName {
        episode: episode.parse().ok()?,
        hash_prefix: hash.to_string(),
        extension: extension.to_string(),
        kind,
    })
}

/// Asset kind for a recognised extension
pub fn kind_for_extension(extension: &str) -> Option<AssetKind> {
    if AUDIO_EXTENSIONS.contains(&extension) {
        Some(AssetKind::Audio)
    } else if IMAGE_EXTENSIONS.contains(&extension) {
        Some(AssetKind::Image)
    } else {
        None
    }
}

/// Extension for a downloaded asset
///
/// Prefers the negotiated content type, then the URL path, then a per-kind default.
pub fn extension_for(kind: AssetKind, content_type: Option<&str>, url: &str) -> String {
    if let Some(ext) = content_type.and_then(|ct| extension_from_content_type(kind, ct)) {
        return ext.to_string();
    }
    if let Some(ext) = extension_from_url(url)
        && kind_for_extension(&ext) == Some(kind)
    {
        return ext;
    }
    match kind {
        AssetKind::Audio => "mp3".to_string(),
        AssetKind::Image => "jpg".to_string(),
    }
}

/// Map a MIME type onto an extension of the given kind
pub fn extension_from_content_type(kind: AssetKind, content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let ext = match mime.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac-mp4" => "m4a",
        "audio/ogg" | "audio/vorbis" | "application/ogg" => "ogg",
        "audio/aac" | "audio/x-aac" | "audio/aacp" => "aac",
        "audio/opus" => "opus",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => return None,
    };
    (kind_for_extension(ext) == Some(kind)).then_some(ext)
}

/// Lowercased extension of the last URL path segment
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    Some(if ext == "jpeg" { "jpg".to_string() } else { ext })
}

/// Bytes being written to the staging area of a show directory
///
/// The staging file is deleted on drop unless it was placed.
pub struct StagedFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    hasher: ContentHasher,
    placed: bool,
}

impl StagedFile {
    /// Create a fresh staging file under `<show_dir>/.partial/`
    pub async fn create(show_dir: &Path) -> std::io::Result<Self> {
        let dir = show_dir.join(PARTIAL_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let token: u64 = rand::thread_rng().r#gen();
        let path = dir.join(format!("{:016x}.part", token));
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            hasher: ContentHasher::new(),
            placed: false,
        })
    }

    /// Staging path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.hasher.size
    }

    /// Append a chunk, hashing it on the way
    pub async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            self.hasher.update(chunk);
        }
        Ok(())
    }

    /// Flush and fsync the staging file, returning the completed digest
    pub async fn seal(&mut self) -> std::io::Result<ContentDigest> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(std::mem::take(&mut self.hasher).finish())
    }

    /// Move the sealed file to its content-addressed name inside `show_dir`
    ///
    /// If the final name already exists with identical content the staging file is
    /// dropped and the existing file is reused. Different content at the final name
    /// is a [`DownloadError::NamingCollision`].
    pub async fn place(
        mut self,
        show_dir: &Path,
        episode: u32,
        digest: &ContentDigest,
        extension: &str,
    ) -> Result<Placement, DownloadError> {
        let final_path = show_dir.join(archive_filename(episode, digest, extension));

        let occupied = tokio::fs::try_exists(&final_path)
            .await
            .map_err(|e| DownloadError::Staging {
                path: final_path.clone(),
                message: format!("failed to check existing file: {}", e),
            })?;
        if occupied {
            let existing = hash_file(&final_path)
                .await
                .map_err(|e| DownloadError::Staging {
                    path: final_path.clone(),
                    message: format!("failed to hash existing file: {}", e),
                })?;
            if existing.hex != digest.hex {
                return Err(DownloadError::NamingCollision { path: final_path });
            }
            tracing::debug!(path = %final_path.display(), "Identical file already in place");
            return Ok(Placement {
                path: final_path,
                reused: true,
            });
        }

        tokio::fs::rename(&self.path, &final_path)
            .await
            .map_err(|e| DownloadError::Staging {
                path: final_path.clone(),
                message: format!("failed to move into place: {}", e),
            })?;
        self.placed = true;

        Ok(Placement {
            path: final_path,
            reused: false,
        })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.placed {
            // The handle must be closed before removal on some platforms
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Result of [`StagedFile::place`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Final path
    pub path: PathBuf,
    /// True when an identical file was already present
    pub reused: bool,
}

/// Delete leftovers of interrupted runs from `<show_dir>/.partial/`
pub async fn purge_partials(show_dir: &Path) -> std::io::Result<usize> {
    let dir = show_dir.join(PARTIAL_DIR);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Purged stale partial downloads");
    }
    Ok(removed)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn stage(show_dir: &Path, bytes: &[u8]) -> (StagedFile, ContentDigest) {
        let mut staged = StagedFile::create(show_dir).await.unwrap();
        staged.write(bytes).await.unwrap();
        let digest = staged.seal().await.unwrap();
        (staged, digest)
    }

    #[test]
    fn identical_bytes_yield_identical_names() {
        let a = archive_filename(7, &digest_bytes(b"episode seven audio"), "mp3");
        let b = archive_filename(7, &digest_bytes(b"episode seven audio"), "mp3");
        let c = archive_filename(7, &digest_bytes(b"episode seven audio, remastered"), "mp3");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("7_"));
        assert!(a.ends_with(".mp3"));
        assert_eq!(a.len(), "7_".len() + HASH_DISPLAY_LEN + ".mp3".len());
    }

    #[test]
    fn digest_of_known_input() {
        let digest = digest_bytes(b"abc");
        assert_eq!(
            digest.hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.display_hash(), "ba7816bf8f01cfea");
        assert_eq!(digest.size, 3);
    }

    #[test]
    fn parse_recognises_scheme_only() {
        let parsed = parse_archive_filename("12_ba7816bf8f01cfea.m4a").unwrap();
        assert_eq!(parsed.episode, 12);
        assert_eq!(parsed.kind, AssetKind::Audio);
        assert!(parsed.matches(&digest_bytes(b"abc")));

        let image = parse_archive_filename("3_0123456789abcdef.jpg").unwrap();
        assert_eq!(image.kind, AssetKind::Image);

        assert!(parse_archive_filename("feed.xml").is_none());
        assert!(parse_archive_filename("cover.jpg").is_none());
        assert!(parse_archive_filename("metadata.json").is_none());
        assert!(parse_archive_filename("12_BA7816BF8F01CFEA.mp3").is_none());
        assert!(parse_archive_filename("12_ba7816bf.mp3").is_none());
        assert!(parse_archive_filename("x_ba7816bf8f01cfea.mp3").is_none());
        assert!(parse_archive_filename("12_ba7816bf8f01cfea.txt").is_none());
    }

    #[test]
    fn extension_prefers_content_type_then_url() {
        assert_eq!(
            extension_for(AssetKind::Audio, Some("audio/mp4"), "https://x/ep.mp3"),
            "m4a"
        );
        assert_eq!(
            extension_for(
                AssetKind::Audio,
                Some("application/octet-stream"),
                "https://x/ep.OGG?token=1"
            ),
            "ogg"
        );
        assert_eq!(
            extension_for(AssetKind::Audio, None, "https://x/stream"),
            "mp3"
        );
        assert_eq!(
            extension_for(AssetKind::Image, Some("image/png; charset=binary"), "https://x/a"),
            "png"
        );
        assert_eq!(
            extension_for(AssetKind::Image, None, "https://x/art.jpeg"),
            "jpg"
        );
        // Audio MIME on an image request is ignored
        assert_eq!(
            extension_for(AssetKind::Image, Some("audio/mpeg"), "https://x/art"),
            "jpg"
        );
    }

    #[tokio::test]
    async fn place_moves_staged_file_and_cleans_partial_dir() {
        let dir = tempdir().unwrap();
        let (staged, digest) = stage(dir.path(), b"some audio").await;
        let staging_path = staged.path().to_path_buf();

        let placement = staged.place(dir.path(), 4, &digest, "mp3").await.unwrap();

        assert!(!placement.reused);
        assert_eq!(
            placement.path,
            dir.path().join(archive_filename(4, &digest, "mp3"))
        );
        assert_eq!(std::fs::read(&placement.path).unwrap(), b"some audio");
        assert!(!staging_path.exists());
    }

    #[tokio::test]
    async fn placing_identical_content_twice_reuses_existing_file() {
        let dir = tempdir().unwrap();
        let (first, digest) = stage(dir.path(), b"same bytes").await;
        first.place(dir.path(), 1, &digest, "mp3").await.unwrap();

        let (second, digest2) = stage(dir.path(), b"same bytes").await;
        let staging_path = second.path().to_path_buf();
        let placement = second.place(dir.path(), 1, &digest2, "mp3").await.unwrap();

        assert!(placement.reused);
        assert!(!staging_path.exists(), "duplicate staging file should be dropped");
    }

    #[tokio::test]
    async fn different_content_under_same_name_is_collision() {
        let dir = tempdir().unwrap();
        let (staged, digest) = stage(dir.path(), b"real audio").await;
        let final_path = dir.path().join(archive_filename(2, &digest, "mp3"));
        std::fs::write(&final_path, b"someone else's bytes").unwrap();

        let err = staged.place(dir.path(), 2, &digest, "mp3").await.unwrap_err();

        assert!(matches!(err, DownloadError::NamingCollision { .. }));
        assert_eq!(std::fs::read(&final_path).unwrap(), b"someone else's bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_final_name_fails_instead_of_overwriting() {
        let dir = tempdir().unwrap();
        let (staged, digest) = stage(dir.path(), b"real audio").await;
        let staging_path = staged.path().to_path_buf();
        // A self-referencing symlink cannot be stat'ed
        let final_path = dir.path().join(archive_filename(5, &digest, "mp3"));
        std::os::unix::fs::symlink(&final_path, &final_path).unwrap();

        let err = staged.place(dir.path(), 5, &digest, "mp3").await.unwrap_err();

        match err {
            DownloadError::Staging { path, message } => {
                assert_eq!(path, final_path);
                assert!(message.contains("failed to check existing file"), "{message}");
            }
            other => panic!("expected Staging, got {other:?}"),
        }
        assert!(std::fs::symlink_metadata(&final_path).unwrap().file_type().is_symlink());
        assert!(!staging_path.exists());
    }

    #[tokio::test]
    async fn dropped_staging_file_is_removed() {
        let dir = tempdir().unwrap();
        let staging_path = {
            let mut staged = StagedFile::create(dir.path()).await.unwrap();
            staged.write(b"half a download").await.unwrap();
            staged.path().to_path_buf()
        };
        assert!(!staging_path.exists());
    }

    #[tokio::test]
    async fn hash_file_matches_in_memory_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        let bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(hash_file(&path).await.unwrap(), digest_bytes(&bytes));
    }

    #[tokio::test]
    async fn purge_removes_only_partial_files() {
        let dir = tempdir().unwrap();
        let partial = dir.path().join(PARTIAL_DIR);
        std::fs::create_dir_all(&partial).unwrap();
        std::fs::write(partial.join("a.part"), b"x").unwrap();
        std::fs::write(partial.join("b.part"), b"y").unwrap();
        std::fs::write(dir.path().join("1_0123456789abcdef.mp3"), b"keep").unwrap();

        assert_eq!(purge_partials(dir.path()).await.unwrap(), 2);
        assert!(dir.path().join("1_0123456789abcdef.mp3").exists());
        assert_eq!(purge_partials(dir.path()).await.unwrap(), 0);
    }
}
