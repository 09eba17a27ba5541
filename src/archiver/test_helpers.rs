//! Shared test helpers for creating Archiver instances with a scripted network.

use crate::config::Config;
use crate::error::FetchError;
use crate::fetch::{FetchResponse, Fetcher};
use crate::types::ShowId;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use super::Archiver;

/// Feed URL used by [`seed_show`]
pub(crate) const FEED_URL: &str = "https://podcast.test/feed.xml";

/// Enclosure URL of episode `n` in feeds built by [`feed_xml`]
pub(crate) fn audio_url(n: u32) -> String {
    format!("https://podcast.test/{n}.mp3")
}

/// One scripted response
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    /// Complete body
    Body {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
    /// Head arrives, body never does
    Stall,
    /// Request fails
    Fail(FetchError),
}

impl Reply {
    pub(crate) fn audio(bytes: impl Into<Vec<u8>>) -> Self {
        Self::typed("audio/mpeg", bytes)
    }

    pub(crate) fn typed(content_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Reply::Body {
            content_type: Some(content_type.to_string()),
            bytes: bytes.into(),
        }
    }

    pub(crate) fn status(url: &str, status: u16) -> Self {
        Reply::Fail(FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

/// [`Fetcher`] answering from per-URL scripts
///
/// Replies are consumed in order and the last one repeats. Unscripted URLs
/// answer 404.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    /// Replace the script for `url` with a single repeating reply
    pub(crate) fn respond(&self, url: &str, reply: Reply) {
        self.script(url, vec![reply]);
    }

    /// Replace the script for `url`
    pub(crate) fn script(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    /// Hold every response head back for `delay`
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Requests made for `url`
    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Requests made for any URL other than the feed
    pub(crate) fn media_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.as_str() != FEED_URL)
            .map(|(_, n)| n)
            .sum()
    }

    /// Highest number of requests that were waiting for their head at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let delay = *self.delay.lock().unwrap();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply.unwrap_or_else(|| Reply::status(url, 404)) {
            Reply::Body {
                content_type,
                bytes,
            } => Ok(FetchResponse {
                url: url.to_string(),
                content_type,
                content_length: Some(bytes.len() as u64),
                body: futures::stream::once(async move { Ok(bytes) }).boxed(),
            }),
            Reply::Stall => Ok(FetchResponse {
                url: url.to_string(),
                content_type: Some("audio/mpeg".to_string()),
                content_length: None,
                body: futures::stream::pending().boxed(),
            }),
            Reply::Fail(e) => Err(e),
        }
    }
}

/// RSS document with one item per episode number, newest first
pub(crate) fn feed_xml(numbers: &[u32]) -> String {
    let mut items = String::new();
    for n in numbers.iter().rev() {
        items.push_str(&format!(
            r#"<item><title>{n}: Episode {n}</title><guid>ep-{n}</guid><enclosure url="{url}" length="0" type="audio/mpeg"/></item>"#,
            url = audio_url(*n)
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel><title>Test Show</title><link>https://podcast.test</link><description>A show for tests</description>{items}</channel>
</rss>"#
    )
}

/// Helper to create a test Archiver backed by a [`ScriptedFetcher`].
/// Returns the archiver, the tempdir (which must be kept alive) and the fetcher.
pub(crate) async fn create_test_archiver() -> (Archiver, tempfile::TempDir, Arc<ScriptedFetcher>) {
    create_test_archiver_with(|_| {}).await
}

/// Like [`create_test_archiver`] with config adjustments applied first
pub(crate) async fn create_test_archiver_with(
    configure: impl FnOnce(&mut Config),
) -> (Archiver, tempfile::TempDir, Arc<ScriptedFetcher>) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.general.download_directory = temp_dir.path().join("downloads");
    config.general.max_parallel_downloads = 3;
    config.general.read_timeout = Duration::from_millis(500);
    config.database.path = temp_dir.path().join("test.db");
    config.downloads.max_retries = 2;
    config.downloads.retry_delay = Duration::from_millis(1);
    configure(&mut config);

    let fetcher = Arc::new(ScriptedFetcher::default());
    let archiver = Archiver::with_fetcher(config, fetcher.clone())
        .await
        .unwrap();

    (archiver, temp_dir, fetcher)
}

/// Register a show whose feed lists `numbers`; episode audio is left unscripted
pub(crate) async fn seed_show(
    archiver: &Archiver,
    fetcher: &ScriptedFetcher,
    numbers: &[u32],
) -> ShowId {
    fetcher.respond(
        FEED_URL,
        Reply::typed("application/rss+xml", feed_xml(numbers)),
    );
    archiver.add_show(FEED_URL).await.unwrap().show_id
}
