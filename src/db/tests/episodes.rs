use super::*;
use std::path::PathBuf;

async fn db_with_show() -> (Database, NamedTempFile, ShowId) {
    let (db, temp) = open_test_db().await;
    let id = db.insert_show(&sample_show("https://example.com/feed.xml")).await.unwrap();
    (db, temp, id)
}

fn audio_asset(name: &str) -> StoredAsset {
    StoredAsset {
        path: PathBuf::from(format!("/archive/1/{}", name)),
        hash: "ab".repeat(32),
        size: 4096,
    }
}

#[tokio::test]
async fn test_upsert_reports_insert_update_unchanged() {
    let (db, _temp, show) = db_with_show().await;

    let ep = sample_episode(1);
    assert_eq!(db.upsert_episode(show, &ep).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(db.upsert_episode(show, &ep).await.unwrap(), UpsertOutcome::Unchanged);

    let mut renamed = ep.clone();
    renamed.title = "Better title".to_string();
    assert_eq!(db.upsert_episode(show, &renamed).await.unwrap(), UpsertOutcome::Updated);

    let stored = db.get_episode(show, 1).await.unwrap().unwrap();
    assert_eq!(stored.title, "Better title");
    assert_eq!(stored.media_sources(), ep.media_sources);

    db.close().await;
}

#[tokio::test]
async fn test_upsert_keeps_download_state() {
    let (db, _temp, show) = db_with_show().await;

    db.upsert_episode(show, &sample_episode(3)).await.unwrap();
    db.record_asset(show, 3, AssetKind::Audio, &audio_asset("3_abcd.mp3"))
        .await
        .unwrap();

    let mut changed = sample_episode(3);
    changed.description = Some("new notes".to_string());
    db.upsert_episode(show, &changed).await.unwrap();

    let stored = db.get_episode(show, 3).await.unwrap().unwrap();
    assert_eq!(stored.download_status(), DownloadStatus::Downloaded);
    assert_eq!(stored.asset(AssetKind::Audio), Some(audio_asset("3_abcd.mp3")));

    db.close().await;
}

#[tokio::test]
async fn test_list_and_numbers_are_ascending() {
    let (db, _temp, show) = db_with_show().await;

    for n in [5, 1, 3] {
        db.upsert_episode(show, &sample_episode(n)).await.unwrap();
    }

    assert_eq!(db.episode_numbers(show).await.unwrap(), vec![1, 3, 5]);
    let listed: Vec<u32> = db
        .list_episodes(show)
        .await
        .unwrap()
        .iter()
        .map(|e| e.number())
        .collect();
    assert_eq!(listed, vec![1, 3, 5]);

    db.close().await;
}

#[tokio::test]
async fn test_record_and_clear_audio() {
    let (db, _temp, show) = db_with_show().await;
    db.upsert_episode(show, &sample_episode(1)).await.unwrap();

    db.mark_episode_failed(show, 1, "transient_fetch_error", "timed out")
        .await
        .unwrap();
    let failed = db.get_episode(show, 1).await.unwrap().unwrap();
    assert_eq!(failed.download_status(), DownloadStatus::Failed);
    assert_eq!(failed.last_error_code.as_deref(), Some("transient_fetch_error"));
    assert!(failed.asset(AssetKind::Audio).is_none());

    db.record_asset(show, 1, AssetKind::Audio, &audio_asset("1_abcd.mp3"))
        .await
        .unwrap();
    let done = db.get_episode(show, 1).await.unwrap().unwrap();
    assert_eq!(done.download_status(), DownloadStatus::Downloaded);
    assert!(done.last_error.is_none());
    assert_eq!(done.was_downloaded, 1);
    assert!(done.downloaded_at.is_some());

    db.clear_asset(show, 1, AssetKind::Audio).await.unwrap();
    let cleared = db.get_episode(show, 1).await.unwrap().unwrap();
    assert_eq!(cleared.download_status(), DownloadStatus::NotDownloaded);
    assert!(cleared.asset(AssetKind::Audio).is_none());
    assert_eq!(cleared.was_downloaded, 1, "history of a past download is kept");
    assert!(cleared.deleted_at.is_some());

    db.close().await;
}

#[tokio::test]
async fn test_image_asset_is_independent_of_audio_status() {
    let (db, _temp, show) = db_with_show().await;
    db.upsert_episode(show, &sample_episode(2)).await.unwrap();

    let image = StoredAsset {
        path: PathBuf::from("/archive/1/2_ffff.jpg"),
        hash: "cd".repeat(32),
        size: 10,
    };
    db.record_asset(show, 2, AssetKind::Image, &image).await.unwrap();

    let ep = db.get_episode(show, 2).await.unwrap().unwrap();
    assert_eq!(ep.download_status(), DownloadStatus::NotDownloaded);
    assert_eq!(ep.asset(AssetKind::Image), Some(image));

    db.clear_asset(show, 2, AssetKind::Image).await.unwrap();
    let ep = db.get_episode(show, 2).await.unwrap().unwrap();
    assert!(ep.asset(AssetKind::Image).is_none());

    db.close().await;
}

#[tokio::test]
async fn test_record_asset_for_unknown_episode_fails() {
    let (db, _temp, show) = db_with_show().await;

    let result = db
        .record_asset(show, 99, AssetKind::Audio, &audio_asset("99_abcd.mp3"))
        .await;
    assert!(result.is_err());

    db.close().await;
}

#[tokio::test]
async fn test_mark_missing_from_feed_and_reappear() {
    let (db, _temp, show) = db_with_show().await;
    for n in 1..=3 {
        db.upsert_episode(show, &sample_episode(n)).await.unwrap();
    }

    let flagged = db.mark_missing_from_feed(show, &[1, 3]).await.unwrap();
    assert_eq!(flagged, vec![2]);
    // Already flagged rows are not reported twice
    assert!(db.mark_missing_from_feed(show, &[1, 3]).await.unwrap().is_empty());

    assert_eq!(
        db.upsert_episode(show, &sample_episode(2)).await.unwrap(),
        UpsertOutcome::Updated
    );
    assert_eq!(db.get_episode(show, 2).await.unwrap().unwrap().in_feed, 1);

    db.close().await;
}

#[tokio::test]
async fn test_delete_episode() {
    let (db, _temp, show) = db_with_show().await;
    db.upsert_episode(show, &sample_episode(1)).await.unwrap();

    assert!(db.delete_episode(show, 1).await.unwrap());
    assert!(!db.delete_episode(show, 1).await.unwrap());
    assert!(db.get_episode(show, 1).await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_failed_redownload_keeps_archived_reference() {
    let (db, _temp, show) = db_with_show().await;
    db.upsert_episode(show, &sample_episode(4)).await.unwrap();
    db.record_asset(show, 4, AssetKind::Audio, &audio_asset("4_abcd.mp3"))
        .await
        .unwrap();

    db.mark_episode_failed(show, 4, "not_found", "gone").await.unwrap();

    let ep = db.get_episode(show, 4).await.unwrap().unwrap();
    assert_eq!(ep.download_status(), DownloadStatus::Downloaded);
    assert_eq!(ep.asset(AssetKind::Audio), Some(audio_asset("4_abcd.mp3")));
    assert_eq!(ep.last_error_code.as_deref(), Some("not_found"));

    db.close().await;
}
