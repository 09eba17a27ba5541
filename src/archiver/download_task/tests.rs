//! Tests for the download task module.

use crate::archiver::Archiver;
use crate::archiver::test_helpers::{
    Reply, ScriptedFetcher, audio_url, create_test_archiver, create_test_archiver_with, seed_show,
};
use crate::error::FetchError;
use crate::feed::MediaSource;
use crate::naming::{PARTIAL_DIR, archive_filename, digest_bytes};
use crate::types::{AssetKind, DownloadStatus, Event, ShowId, TaskOutcome};
use std::sync::Arc;

use super::context::DownloadTask;
use super::orchestration::run_download_task;
use super::transfer::order_candidates;

fn source(url: &str, content_type: Option<&str>) -> MediaSource {
    MediaSource {
        url: url.to_string(),
        content_type: content_type.map(str::to_string),
    }
}

fn audio_task(archiver: &Archiver, show_id: ShowId, episode: u32, sources: Vec<MediaSource>) -> DownloadTask {
    DownloadTask {
        show_id,
        episode,
        kind: AssetKind::Audio,
        sources,
        target_dir: archiver.config.show_dir(show_id),
        duration_secs: None,
    }
}

async fn run(archiver: &Archiver, task: DownloadTask) -> TaskOutcome {
    run_download_task(archiver.task_context(task)).await
}

async fn setup() -> (Archiver, tempfile::TempDir, Arc<ScriptedFetcher>, ShowId) {
    let (archiver, temp_dir, fetcher) = create_test_archiver().await;
    let show_id = seed_show(&archiver, &fetcher, &[1, 2]).await;
    (archiver, temp_dir, fetcher, show_id)
}

fn partial_files(archiver: &Archiver, show_id: ShowId) -> usize {
    std::fs::read_dir(archiver.config.show_dir(show_id).join(PARTIAL_DIR))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

// -----------------------------------------------------------------------
// candidate ordering
// -----------------------------------------------------------------------

#[test]
fn order_candidates_follows_preferred_formats() {
    let sources = vec![
        source("https://x/a.ogg", Some("audio/ogg")),
        source("https://x/a.mp3", Some("audio/mpeg")),
        source("https://x/a.m4a", None),
    ];
    let preferred = vec!["m4a".to_string(), "mp3".to_string()];

    let ordered: Vec<String> = order_candidates(&sources, &preferred)
        .into_iter()
        .map(|s| s.url)
        .collect();

    assert_eq!(ordered, vec!["https://x/a.m4a", "https://x/a.mp3", "https://x/a.ogg"]);
}

#[test]
fn order_candidates_keeps_feed_order_for_unknown_formats() {
    let sources = vec![
        source("https://x/first", None),
        source("https://x/second", None),
    ];

    let ordered = order_candidates(&sources, &["mp3".to_string()]);

    assert_eq!(ordered, sources);
}

// -----------------------------------------------------------------------
// run_download_task
// -----------------------------------------------------------------------

#[tokio::test]
async fn successful_download_is_placed_and_recorded() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let body = b"episode one audio".to_vec();
    fetcher.respond(&audio_url(1), Reply::audio(body.clone()));

    let task = audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), Some("audio/mpeg"))]);
    let outcome = run(&archiver, task).await;

    let digest = digest_bytes(&body);
    let expected = archiver
        .config
        .show_dir(show_id)
        .join(archive_filename(1, &digest, "mp3"));
    assert_eq!(
        outcome,
        TaskOutcome::Downloaded {
            path: expected.clone(),
            size: body.len() as u64
        }
    );
    assert_eq!(std::fs::read(&expected).unwrap(), body);
    assert_eq!(partial_files(&archiver, show_id), 0);

    let episode = archiver.db.get_episode(show_id, 1).await.unwrap().unwrap();
    assert_eq!(episode.download_status(), DownloadStatus::Downloaded);
    assert_eq!(episode.audio_hash.as_deref(), Some(digest.hex.as_str()));
    assert_eq!(episode.was_downloaded, 1);
}

#[tokio::test]
async fn missing_media_fails_without_retry() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;

    let task = audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), None)]);
    let outcome = run(&archiver, task).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "not_found"),
        "got {outcome:?}"
    );
    assert_eq!(fetcher.calls(&audio_url(1)), 1);
    assert_eq!(partial_files(&archiver, show_id), 0);

    let episode = archiver.db.get_episode(show_id, 1).await.unwrap().unwrap();
    assert_eq!(episode.download_status(), DownloadStatus::Failed);
    assert_eq!(episode.last_error_code.as_deref(), Some("not_found"));
}

#[tokio::test]
async fn transient_failures_exhaust_retries() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let url = audio_url(1);
    fetcher.respond(&url, Reply::status(&url, 503));
    let mut events = archiver.subscribe();

    let task = audio_task(&archiver, show_id, 1, vec![source(&url, None)]);
    let outcome = run(&archiver, task).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "transient_fetch_error"),
        "got {outcome:?}"
    );
    // First attempt plus max_retries
    assert_eq!(fetcher.calls(&url), 3);

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::TaskRetrying { .. }) {
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let url = audio_url(1);
    fetcher.script(
        &url,
        vec![
            Reply::Fail(FetchError::Interrupted {
                url: url.clone(),
                message: "connection reset".into(),
            }),
            Reply::audio(b"second try".to_vec()),
        ],
    );

    let task = audio_task(&archiver, show_id, 1, vec![source(&url, None)]);
    let outcome = run(&archiver, task).await;

    assert_eq!(outcome.label(), "downloaded");
    assert_eq!(fetcher.calls(&url), 2);
}

#[tokio::test]
async fn stalled_body_times_out_and_is_transient() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let url = audio_url(1);
    fetcher.respond(&url, Reply::Stall);

    let task = audio_task(&archiver, show_id, 1, vec![source(&url, None)]);
    let outcome = run(&archiver, task).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "transient_fetch_error"),
        "got {outcome:?}"
    );
    assert_eq!(partial_files(&archiver, show_id), 0);
}

#[tokio::test]
async fn falls_back_to_next_candidate() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let primary = "https://podcast.test/1.m4a";
    let alternate = "https://podcast.test/1.ogg";
    fetcher.respond(alternate, Reply::typed("audio/ogg", b"ogg audio".to_vec()));

    let task = audio_task(
        &archiver,
        show_id,
        1,
        vec![
            source(primary, Some("audio/x-m4a")),
            source(alternate, Some("audio/ogg")),
        ],
    );
    let outcome = run(&archiver, task).await;

    let TaskOutcome::Downloaded { path, .. } = outcome else {
        panic!("expected download, got {outcome:?}");
    };
    assert_eq!(path.extension().unwrap(), "ogg");
    assert_eq!(fetcher.calls(primary), 1);
}

#[tokio::test]
async fn preferred_format_is_tried_first() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let mp3 = "https://podcast.test/1.mp3";
    let ogg = "https://podcast.test/1.ogg";
    fetcher.respond(mp3, Reply::audio(b"mp3 audio".to_vec()));
    fetcher.respond(ogg, Reply::typed("audio/ogg", b"ogg audio".to_vec()));

    // Feed lists ogg first; default preference puts mp3 ahead
    let task = audio_task(
        &archiver,
        show_id,
        1,
        vec![source(ogg, Some("audio/ogg")), source(mp3, Some("audio/mpeg"))],
    );
    let outcome = run(&archiver, task).await;

    assert_eq!(outcome.label(), "downloaded");
    assert_eq!(fetcher.calls(mp3), 1);
    assert_eq!(fetcher.calls(ogg), 0);
}

#[tokio::test]
async fn low_bitrate_audio_is_rejected() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let url = audio_url(1);
    // MPEG-1 Layer III frame header at 32 kbps
    let mut body = vec![0xFF, 0xFB, 0x10, 0x00];
    body.extend(std::iter::repeat_n(0u8, 256));
    fetcher.respond(&url, Reply::audio(body));

    let task = audio_task(&archiver, show_id, 1, vec![source(&url, None)]);
    let outcome = run(&archiver, task).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "quality_rejected"),
        "got {outcome:?}"
    );
    assert_eq!(partial_files(&archiver, show_id), 0);
    let entries: Vec<_> = std::fs::read_dir(archiver.config.show_dir(show_id))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("1_"))
        .collect();
    assert!(entries.is_empty(), "rejected audio must not be placed");
}

#[tokio::test]
async fn quality_floor_of_zero_accepts_anything() {
    let (archiver, _temp_dir, fetcher) = create_test_archiver_with(|config| {
        config.downloads.min_audio_quality = 0;
    })
    .await;
    let show_id = seed_show(&archiver, &fetcher, &[1]).await;
    let url = audio_url(1);
    let mut body = vec![0xFF, 0xFB, 0x10, 0x00];
    body.extend(std::iter::repeat_n(0u8, 256));
    fetcher.respond(&url, Reply::audio(body));

    let outcome = run(&archiver, audio_task(&archiver, show_id, 1, vec![source(&url, None)])).await;

    assert_eq!(outcome.label(), "downloaded");
}

#[tokio::test]
async fn html_and_empty_bodies_are_malformed() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    fetcher.respond(&audio_url(1), Reply::typed("text/html; charset=utf-8", b"<html>".to_vec()));
    fetcher.respond(&audio_url(2), Reply::audio(Vec::new()));

    for episode in [1, 2] {
        let url = audio_url(episode);
        let outcome = run(&archiver, audio_task(&archiver, show_id, episode, vec![source(&url, None)])).await;
        assert!(
            matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "malformed_content"),
            "episode {episode}: got {outcome:?}"
        );
    }
}

#[tokio::test]
async fn no_sources_is_reported() {
    let (archiver, _temp_dir, _fetcher, show_id) = setup().await;

    let outcome = run(&archiver, audio_task(&archiver, show_id, 1, Vec::new())).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "no_source"),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn identical_file_in_place_is_reused() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let body = b"same bytes".to_vec();
    fetcher.respond(&audio_url(1), Reply::audio(body.clone()));

    let first = run(&archiver, audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), None)])).await;
    let second = run(&archiver, audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), None)])).await;

    assert_eq!(first, second);
    assert_eq!(partial_files(&archiver, show_id), 0);
}

#[tokio::test]
async fn different_content_under_final_name_is_a_collision() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let body = b"real audio".to_vec();
    fetcher.respond(&audio_url(1), Reply::audio(body.clone()));

    let show_dir = archiver.config.show_dir(show_id);
    std::fs::create_dir_all(&show_dir).unwrap();
    let squatter = show_dir.join(archive_filename(1, &digest_bytes(&body), "mp3"));
    std::fs::write(&squatter, b"something else").unwrap();

    let outcome = run(&archiver, audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), None)])).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "naming_collision"),
        "got {outcome:?}"
    );
    assert_eq!(std::fs::read(&squatter).unwrap(), b"something else");
}

#[tokio::test]
async fn record_failure_after_placement_is_store_write_error() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    let body = b"placed but unrecorded".to_vec();
    fetcher.respond(&audio_url(1), Reply::audio(body.clone()));

    archiver.db.close_pool().await;
    let outcome = run(&archiver, audio_task(&archiver, show_id, 1, vec![source(&audio_url(1), None)])).await;

    assert!(
        matches!(&outcome, TaskOutcome::Failed { code, .. } if code == "store_write_error"),
        "got {outcome:?}"
    );
    // The file stays for the reconciler to adopt
    let placed = archiver
        .config
        .show_dir(show_id)
        .join(archive_filename(1, &digest_bytes(&body), "mp3"));
    assert!(placed.exists());
}

#[tokio::test]
async fn failed_image_leaves_episode_status_alone() {
    let (archiver, _temp_dir, _fetcher, show_id) = setup().await;
    let task = DownloadTask {
        kind: AssetKind::Image,
        ..audio_task(&archiver, show_id, 1, vec![source("https://podcast.test/1.jpg", None)])
    };

    let outcome = run(&archiver, task).await;

    assert_eq!(outcome.label(), "failed");
    let episode = archiver.db.get_episode(show_id, 1).await.unwrap().unwrap();
    assert_eq!(episode.download_status(), DownloadStatus::NotDownloaded);
}

#[tokio::test]
async fn task_emits_started_and_finished() {
    let (archiver, _temp_dir, fetcher, show_id) = setup().await;
    fetcher.respond(&audio_url(2), Reply::audio(b"two".to_vec()));
    let mut events = archiver.subscribe();

    run(&archiver, audio_task(&archiver, show_id, 2, vec![source(&audio_url(2), None)])).await;

    let first = events.try_recv().unwrap();
    assert!(matches!(first, Event::TaskStarted { episode: 2, .. }));
    let last = events.try_recv().unwrap();
    assert!(matches!(
        last,
        Event::TaskFinished {
            episode: 2,
            outcome: TaskOutcome::Downloaded { .. },
            ..
        }
    ));
}
