//! Property tests for feed selection: never-fetched feeds come first, then the
//! feed with the oldest fetch attempt.
//!
//! Each case builds its own runtime and in-memory SQLite database.

use chrono::{Duration, TimeZone, Utc};
use gator::storage::Database;
use proptest::prelude::*;
use uuid::Uuid;

/// Create one feed per entry; `Some(minutes)` marks it fetched that many
/// minutes after a fixed epoch, `None` leaves it unfetched.
async fn seed(db: &Database, schedule: &[Option<i64>]) -> Vec<(Uuid, Option<i64>)> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let user = db.create_user("owner", Utc::now()).await.unwrap();

    let mut feeds = Vec::with_capacity(schedule.len());
    for (i, slot) in schedule.iter().enumerate() {
        let feed = db
            .create_feed(
                &format!("Feed {}", i),
                &format!("https://feed{}.example.com/rss", i),
                user.id,
                Utc::now(),
            )
            .await
            .unwrap();
        if let Some(minutes) = slot {
            db.mark_fetched(feed.id, base + Duration::minutes(*minutes))
                .await
                .unwrap();
        }
        feeds.push((feed.id, *slot));
    }
    feeds
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn selects_unfetched_first_then_oldest(
        schedule in prop::collection::vec(prop::option::of(0i64..10_000), 1..12)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let db = Database::open(":memory:").await.unwrap();
            let feeds = seed(&db, &schedule).await;

            let selected = db.select_next_feed().await.unwrap();
            let (_, selected_slot) = feeds
                .iter()
                .find(|(id, _)| *id == selected.id)
                .copied()
                .unwrap();

            if schedule.iter().any(Option::is_none) {
                prop_assert_eq!(selected_slot, None);
            } else {
                let oldest = schedule.iter().flatten().min().copied();
                prop_assert_eq!(selected_slot, oldest);
            }
            Ok(())
        })?;
    }

    #[test]
    fn marking_the_selection_moves_it_to_the_back(
        schedule in prop::collection::vec(prop::option::of(0i64..10_000), 2..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let db = Database::open(":memory:").await.unwrap();
            seed(&db, &schedule).await;

            let first = db.select_next_feed().await.unwrap();
            let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
            db.mark_fetched(first.id, later).await.unwrap();

            let second = db.select_next_feed().await.unwrap();
            prop_assert_ne!(first.id, second.id);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_three_feed_scenario() {
    let db = Database::open(":memory:").await.unwrap();
    let user = db.create_user("owner", Utc::now()).await.unwrap();
    let t = Utc::now();

    let f1 = db
        .create_feed("F1", "https://f1.example.com/rss", user.id, t)
        .await
        .unwrap();
    let f2 = db
        .create_feed("F2", "https://f2.example.com/rss", user.id, t)
        .await
        .unwrap();
    let f3 = db
        .create_feed("F3", "https://f3.example.com/rss", user.id, t)
        .await
        .unwrap();
    db.mark_fetched(f2.id, t - Duration::minutes(10)).await.unwrap();
    db.mark_fetched(f3.id, t - Duration::minutes(1)).await.unwrap();

    assert_eq!(db.select_next_feed().await.unwrap().id, f1.id);

    db.mark_fetched(f1.id, t).await.unwrap();
    assert_eq!(db.select_next_feed().await.unwrap().id, f2.id);
}
