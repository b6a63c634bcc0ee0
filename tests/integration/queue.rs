//! Merge-queue ranking integration tests.

use chrono::Duration;

use rigwatch::queue::{rank, ranked_ids};
use rigwatch::score::{score_with_defaults, ScoreConfig, ScoreInput, WorkItem};

use crate::fixtures::fixed_now;

fn item(id: &str, priority: i32, age_hours: i64, convoy_hours: Option<i64>, retries: u32) -> WorkItem {
    let now = fixed_now();
    WorkItem {
        id: id.to_string(),
        priority,
        created_at: now - Duration::hours(age_hours),
        convoy_created_at: convoy_hours.map(|h| now - Duration::hours(h)),
        retry_count: retries,
    }
}

/// Test: Worked examples
/// Given default weights
/// When the two reference items are scored
/// Then they score 1392 and 1201
#[test]
fn test_reference_scores() {
    let now = fixed_now();
    let convoy = ScoreInput {
        priority: 2,
        created_at: now - Duration::hours(2),
        convoy_created_at: Some(now - Duration::hours(24)),
        retry_count: 1,
        now: Some(now),
    };
    let plain = ScoreInput {
        priority: 2,
        created_at: now - Duration::hours(1),
        convoy_created_at: None,
        retry_count: 0,
        now: Some(now),
    };
    assert_eq!(score_with_defaults(&convoy), 1392.0);
    assert_eq!(score_with_defaults(&plain), 1201.0);
}

#[test]
fn test_starving_convoy_overtakes_fresh_urgent_work() {
    let items = vec![
        item("urgent-fresh", 0, 0, None, 0),
        item("convoy-old", 2, 1, Some(30), 0),
        item("flaky", 1, 1, None, 6),
    ];
    let entries = rank(&items, Some(fixed_now()), &ScoreConfig::default());
    assert_eq!(ranked_ids(&entries), vec!["convoy-old", "urgent-fresh", "flaky"]);
}

#[test]
fn test_queue_from_json_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("queue.json");
    std::fs::write(
        &path,
        r#"[
  {"id": "gt-mr-low", "priority": 4, "created_at": "2025-12-17T11:00:00Z"},
  {"id": "gt-mr-high", "priority": 0, "created_at": "2025-12-17T11:00:00Z"},
  {"id": "gt-mr-retry", "priority": 0, "created_at": "2025-12-17T11:00:00Z", "retry_count": 8}
]"#,
    )
    .unwrap();

    let items: Vec<WorkItem> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entries = rank(&items, Some(fixed_now()), &ScoreConfig::default());
    assert_eq!(ranked_ids(&entries), vec!["gt-mr-high", "gt-mr-retry", "gt-mr-low"]);
    assert_eq!(entries[0].score, 1401.0);
}

#[test]
fn test_custom_weights_change_order() {
    let items = vec![item("old", 4, 100, None, 0), item("urgent", 0, 0, None, 0)];
    let age_heavy = ScoreConfig {
        mr_age_weight: 10.0,
        ..Default::default()
    };
    assert_eq!(
        ranked_ids(&rank(&items, Some(fixed_now()), &ScoreConfig::default())),
        vec!["urgent", "old"]
    );
    assert_eq!(
        ranked_ids(&rank(&items, Some(fixed_now()), &age_heavy)),
        vec!["old", "urgent"]
    );
}
