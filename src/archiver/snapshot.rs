//! Snapshots kept next to a show's archive files.
//!
//! - `feed.xml`: the feed as last fetched, refreshed on add and sync
//! - `metadata.json`: show details and the last batch's selection
//! - `cover.<ext>`: the show artwork, fetched once
//!
//! None of these follow the archive naming scheme, so the reconciler ignores them.

use crate::db::Show;
use crate::error::{DownloadError, Error, Result};
use crate::feed::ParsedFeed;
use crate::fetch::fetch_bytes;
use crate::naming::{IMAGE_EXTENSIONS, PARTIAL_DIR, extension_for};
use crate::types::{AssetKind, ShowId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::Archiver;

/// Feed snapshot filename
pub const FEED_XML: &str = "feed.xml";
/// Show metadata filename
pub const METADATA_JSON: &str = "metadata.json";
const COVER_STEM: &str = "cover";

#[derive(Serialize)]
struct ShowMetadata<'a> {
    show_id: ShowId,
    title: &'a str,
    feed_url: &'a str,
    description: Option<&'a str>,
    author: Option<&'a str>,
    language: Option<&'a str>,
    last_download: String,
    last_feed_update: Option<String>,
    episode_filter: &'a str,
}

impl Archiver {
    /// Keep the fetched feed verbatim as `feed.xml` when `save_feed_xml` is set
    pub(super) async fn save_feed_snapshot(&self, show_id: ShowId, feed: &ParsedFeed) {
        if !self.config.downloads.save_feed_xml {
            return;
        }
        let show_dir = self.config.show_dir(show_id);
        if let Err(e) = write_atomic(&show_dir, FEED_XML, &feed.raw).await {
            tracing::warn!(show_id = %show_id, error = %e, "Failed to save feed.xml");
        }
    }

    /// Write the batch snapshots enabled under `[downloads]`
    ///
    /// Failures are logged and never stop the batch.
    pub(super) async fn write_snapshots(&self, show: &Show, show_dir: &Path, selection: &str) {
        let downloads = &self.config.downloads;

        if downloads.save_metadata_json {
            let written = match metadata_json(show, selection) {
                Ok(bytes) => write_atomic(show_dir, METADATA_JSON, &bytes)
                    .await
                    .map_err(Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::warn!(show_id = %show.id, error = %e, "Failed to save metadata.json");
            }
        }

        if downloads.download_covers
            && let Some(url) = &show.image_url
        {
            match self.fetch_cover(show_dir, url).await {
                Ok(Some(path)) => {
                    tracing::info!(show_id = %show.id, path = %path.display(), "Saved show cover");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(show_id = %show.id, url = %url, error = %e, "Failed to fetch show cover");
                }
            }
        }
    }

    /// Fetch the show cover unless one is already present
    async fn fetch_cover(&self, show_dir: &Path, url: &str) -> Result<Option<PathBuf>> {
        if existing_cover(show_dir).await?.is_some() {
            return Ok(None);
        }

        let (content_type, bytes) = fetch_bytes(
            self.fetcher.as_ref(),
            url,
            self.config.general.read_timeout,
            self.config.downloads.max_feed_bytes,
        )
        .await?;
        if bytes.is_empty() {
            return Err(Error::Download(DownloadError::MalformedContent {
                url: url.to_string(),
                reason: "empty body".to_string(),
            }));
        }

        let extension = extension_for(AssetKind::Image, content_type.as_deref(), url);
        let path = write_atomic(show_dir, &format!("{}.{}", COVER_STEM, extension), &bytes).await?;
        Ok(Some(path))
    }
}

fn metadata_json(show: &Show, selection: &str) -> Result<Vec<u8>> {
    let metadata = ShowMetadata {
        show_id: show.id,
        title: &show.title,
        feed_url: &show.feed_url,
        description: show.description.as_deref(),
        author: show.author.as_deref(),
        language: show.language.as_deref(),
        last_download: Utc::now().to_rfc3339(),
        last_feed_update: show
            .last_synced_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339()),
        episode_filter: selection,
    };
    Ok(serde_json::to_vec_pretty(&metadata)?)
}

/// Path of an existing `cover.<image ext>` in `show_dir`
pub(crate) async fn existing_cover(show_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for ext in IMAGE_EXTENSIONS {
        let path = show_dir.join(format!("{}.{}", COVER_STEM, ext));
        if tokio::fs::try_exists(&path).await? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Write `bytes` to `dir/name` through the staging area so readers never see a partial file
async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let staging = dir.join(PARTIAL_DIR);
    tokio::fs::create_dir_all(&staging).await?;

    let tmp = staging.join(format!("{}.tmp", name));
    tokio::fs::write(&tmp, bytes).await?;

    let path = dir.join(name);
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(path)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_atomic(dir.path(), FEED_XML, b"<rss/>").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"<rss/>");
        let leftovers = std::fs::read_dir(dir.path().join(PARTIAL_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn finds_cover_with_any_image_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert!(existing_cover(dir.path()).await.unwrap().is_none());

        std::fs::write(dir.path().join("cover.png"), b"png").unwrap();
        assert_eq!(
            existing_cover(dir.path()).await.unwrap(),
            Some(dir.path().join("cover.png"))
        );
    }

    #[test]
    fn metadata_describes_show_and_selection() {
        let show = Show {
            id: ShowId(7),
            feed_url: "https://example.com/feed.xml".into(),
            title: "Test Show".into(),
            description: None,
            author: Some("Jane Host".into()),
            language: None,
            image_url: None,
            created_at: 0,
            updated_at: 0,
            last_synced_at: Some(1_704_067_200),
        };
        let bytes = metadata_json(&show, "episodes 1-5").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["show_id"], 7);
        assert_eq!(value["title"], "Test Show");
        assert_eq!(value["episode_filter"], "episodes 1-5");
        assert_eq!(value["last_feed_update"], "2024-01-01T00:00:00+00:00");
    }
}
