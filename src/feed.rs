//! Podcast feed parsing.
//!
//! Feeds are RSS 2.0 documents with the iTunes extension. Each item becomes a
//! [`FeedEpisode`] with a stable episode number taken from, in order:
//! 1. `itunes:episode`
//! 2. a leading number in the title (`"42: Title"`, `"42 - Title"`, `"42. Title"`)
//! 3. its position counted from the oldest item (feeds list newest first)
//!
//! When two items end up with the same number the first one in feed order wins
//! and the other is dropped with a warning.

use crate::error::{Error, Result};
use crate::fetch::{Fetcher, fetch_bytes};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static TITLE_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)[\s:\-.]+").ok());

/// One downloadable media rendition of an episode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    /// Media URL
    pub url: String,
    /// Declared MIME type
    pub content_type: Option<String>,
}

/// An episode as described by the feed
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEpisode {
    /// Episode number (unique within the show)
    pub number: u32,
    /// Item title
    pub title: String,
    /// Item GUID
    pub guid: Option<String>,
    /// Publication date
    pub published_at: Option<DateTime<Utc>>,
    /// Enclosure, followed by `media:content` alternates
    pub media: Vec<MediaSource>,
    /// Episode artwork
    pub image_url: Option<String>,
    /// Declared duration
    pub duration_secs: Option<u64>,
    /// Item description
    pub description: Option<String>,
}

impl FeedEpisode {
    /// Primary media URL (the enclosure)
    pub fn media_url(&self) -> Option<&str> {
        self.media.first().map(|m| m.url.as_str())
    }
}

/// A parsed feed
#[derive(Clone, Debug)]
pub struct ParsedFeed {
    /// Show title
    pub title: String,
    /// Show description
    pub description: Option<String>,
    /// Show author
    pub author: Option<String>,
    /// Feed language
    pub language: Option<String>,
    /// Show cover image
    pub image_url: Option<String>,
    /// Episodes in feed order
    pub episodes: Vec<FeedEpisode>,
    /// The document as fetched
    pub raw: Vec<u8>,
}

/// Fetch and parse the feed at `url`, refusing documents over `max_bytes`
pub async fn load_feed(
    fetcher: &dyn Fetcher,
    url: &str,
    read_timeout: Duration,
    max_bytes: u64,
) -> Result<ParsedFeed> {
    debug!("Fetching feed: {}", url);
    let (_, raw) = fetch_bytes(fetcher, url, read_timeout, max_bytes).await?;
    parse_feed(raw)
}

/// Parse an RSS document
pub fn parse_feed(raw: Vec<u8>) -> Result<ParsedFeed> {
    let channel = rss::Channel::read_from(&raw[..])
        .map_err(|e| Error::Feed(format!("RSS parse error: {}", e)))?;

    let itunes = channel.itunes_ext();
    let image_url = itunes
        .and_then(|ext| ext.image())
        .map(|s| s.to_string())
        .or_else(|| channel.image().map(|img| img.url().to_string()));
    let author = itunes
        .and_then(|ext| ext.author())
        .or(channel.managing_editor())
        .map(|s| s.to_string());

    let items = channel.items();
    let total = items.len();
    let mut seen = HashSet::new();
    let mut episodes = Vec::with_capacity(total);

    for (index, item) in items.iter().enumerate() {
        let title = item.title().unwrap_or("").trim().to_string();
        let number = episode_number(item, &title, total - index);

        if !seen.insert(number) {
            warn!(
                episode = number,
                title = %title,
                "Duplicate episode number in feed, keeping the first occurrence"
            );
            continue;
        }

        episodes.push(FeedEpisode {
            number,
            title,
            guid: item.guid().map(|g| g.value().to_string()),
            published_at: item.pub_date().and_then(|date| {
                DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            media: media_sources(item),
            image_url: item
                .itunes_ext()
                .and_then(|ext| ext.image())
                .map(|s| s.to_string()),
            duration_secs: item
                .itunes_ext()
                .and_then(|ext| ext.duration())
                .and_then(parse_duration),
            description: item.description().map(|d| d.to_string()),
        });
    }

    debug!("Parsed feed '{}' with {} episodes", channel.title(), episodes.len());

    Ok(ParsedFeed {
        title: channel.title().to_string(),
        description: Some(channel.description().to_string()).filter(|d| !d.is_empty()),
        author,
        language: channel.language().map(|s| s.to_string()),
        image_url,
        episodes,
        raw,
    })
}

fn episode_number(item: &rss::Item, title: &str, position: usize) -> u32 {
    if let Some(n) = item
        .itunes_ext()
        .and_then(|ext| ext.episode())
        .and_then(|ep| ep.trim().parse::<u32>().ok())
    {
        return n;
    }
    if let Some(re) = TITLE_NUMBER.as_ref()
        && let Some(caps) = re.captures(title)
        && let Ok(n) = caps[1].parse::<u32>()
    {
        return n;
    }
    u32::try_from(position).unwrap_or(u32::MAX)
}

fn media_sources(item: &rss::Item) -> Vec<MediaSource> {
    let mut sources: Vec<MediaSource> = Vec::new();
    if let Some(enclosure) = item.enclosure() {
        sources.push(MediaSource {
            url: enclosure.url().to_string(),
            content_type: Some(enclosure.mime_type().to_string()).filter(|t| !t.is_empty()),
        });
    }

    if let Some(media) = item.extensions().get("media") {
        let direct = media.get("content").into_iter().flatten();
        let grouped = media
            .get("group")
            .into_iter()
            .flatten()
            .flat_map(|group| group.children().get("content").into_iter().flatten());

        for ext in direct.chain(grouped) {
            let Some(url) = ext.attrs().get("url") else {
                continue;
            };
            if sources.iter().any(|s| &s.url == url) {
                continue;
            }
            let content_type = ext.attrs().get("type").cloned();
            let is_audio = content_type
                .as_deref()
                .is_none_or(|t| t.starts_with("audio/"));
            if is_audio {
                sources.push(MediaSource {
                    url: url.clone(),
                    content_type,
                });
            }
        }
    }

    sources
}

/// Parse `HH:MM:SS`, `MM:SS` or plain seconds
pub fn parse_duration(value: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in parts {
        let n: u64 = part.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(n)?;
    }
    Some(total)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Test Show</title>
    <link>https://example.com</link>
    <description>A show for tests</description>
    <language>en</language>
    <itunes:author>Jane Host</itunes:author>
    <itunes:image href="https://example.com/cover.jpg"/>
    <item>
      <title>Fresh episode without number</title>
      <guid>ep-c</guid>
      <pubDate>Wed, 03 Jan 2024 10:00:00 +0000</pubDate>
      <enclosure url="https://example.com/c.mp3" length="100" type="audio/mpeg"/>
      <media:content url="https://example.com/c.ogg" type="audio/ogg"/>
      <media:content url="https://example.com/c.jpg" type="image/jpeg"/>
    </item>
    <item>
      <title>Some title</title>
      <guid>ep-b</guid>
      <itunes:episode>12</itunes:episode>
      <itunes:duration>01:02:03</itunes:duration>
      <itunes:image href="https://example.com/b.png"/>
      <enclosure url="https://example.com/b.m4a" length="100" type="audio/x-m4a"/>
    </item>
    <item>
      <title>7: Numbered in the title</title>
      <guid>ep-a</guid>
      <enclosure url="https://example.com/a.mp3" length="100" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn channel_metadata_is_extracted() {
        let feed = parse_feed(FEED.as_bytes().to_vec()).unwrap();
        assert_eq!(feed.title, "Test Show");
        assert_eq!(feed.author.as_deref(), Some("Jane Host"));
        assert_eq!(feed.language.as_deref(), Some("en"));
        assert_eq!(feed.image_url.as_deref(), Some("https://example.com/cover.jpg"));
        assert_eq!(feed.raw, FEED.as_bytes());
    }

    #[test]
    fn episode_numbers_follow_itunes_then_title_then_position() {
        let feed = parse_feed(FEED.as_bytes().to_vec()).unwrap();
        let numbers: Vec<u32> = feed.episodes.iter().map(|e| e.number).collect();
        // Newest item has no number: position 3 counted from the oldest
        assert_eq!(numbers, vec![3, 12, 7]);
    }

    #[test]
    fn item_details_are_extracted() {
        let feed = parse_feed(FEED.as_bytes().to_vec()).unwrap();
        let b = &feed.episodes[1];
        assert_eq!(b.duration_secs, Some(3723));
        assert_eq!(b.image_url.as_deref(), Some("https://example.com/b.png"));
        assert_eq!(b.media_url(), Some("https://example.com/b.m4a"));

        let c = &feed.episodes[0];
        assert_eq!(
            c.published_at.unwrap().to_rfc3339(),
            "2024-01-03T10:00:00+00:00"
        );
        let urls: Vec<&str> = c.media.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/c.mp3", "https://example.com/c.ogg"],
            "image media:content must not become an audio alternate"
        );
    }

    #[test]
    fn duplicate_numbers_keep_first_occurrence() {
        let xml = r#"<rss version="2.0"><channel><title>T</title><link>l</link><description>d</description>
            <item><title>5: newer</title><enclosure url="https://x/new.mp3" length="1" type="audio/mpeg"/></item>
            <item><title>5 - older</title><enclosure url="https://x/old.mp3" length="1" type="audio/mpeg"/></item>
            </channel></rss>"#;
        let feed = parse_feed(xml.as_bytes().to_vec()).unwrap();
        assert_eq!(feed.episodes.len(), 1);
        assert_eq!(feed.episodes[0].media_url(), Some("https://x/new.mp3"));
    }

    #[test]
    fn garbage_is_feed_error() {
        let err = parse_feed(b"<html>not a feed</html>".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("1:30"), Some(90));
        assert_eq!(parse_duration("01:00:00"), Some(3600));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("1:2:3:4"), None);
    }
}
