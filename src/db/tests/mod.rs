use super::*;
use tempfile::NamedTempFile;

mod episodes;

async fn open_test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn sample_show(feed_url: &str) -> NewShow {
    NewShow {
        feed_url: feed_url.to_string(),
        title: "Test Show".to_string(),
        description: Some("A show for tests".to_string()),
        author: Some("Jane Host".to_string()),
        language: Some("en".to_string()),
        image_url: None,
    }
}

fn sample_episode(number: u32) -> NewEpisode {
    NewEpisode {
        episode_number: number,
        title: format!("Episode {}", number),
        guid: Some(format!("guid-{}", number)),
        published_at: Some(1_700_000_000 + i64::from(number)),
        media_url: Some(format!("https://example.com/{}.mp3", number)),
        media_sources: vec![crate::feed::MediaSource {
            url: format!("https://example.com/{}.mp3", number),
            content_type: Some("audio/mpeg".to_string()),
        }],
        image_url: None,
        duration_secs: Some(1800),
        description: None,
    }
}
