//! Ranked merge queue. Scores are recomputed from scratch on every call.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::score::{score, ScoreConfig, ScoreInput, WorkItem};
use crate::zlog_debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: String,
    pub score: f64,
    pub input: ScoreInput,
}

/// Rank items highest score first. Equal scores keep their input order.
///
/// All items are scored against one instant; when `now` is `None` the wall
/// clock is read once for the whole batch.
pub fn rank(items: &[WorkItem], now: Option<DateTime<Utc>>, config: &ScoreConfig) -> Vec<QueueEntry> {
    let now = now.unwrap_or_else(Utc::now);
    let mut entries: Vec<QueueEntry> = items
        .iter()
        .map(|item| {
            let input = item.input_at(Some(now));
            QueueEntry {
                id: item.id.clone(),
                score: score(&input, config),
                input,
            }
        })
        .collect();

    // sort_by is stable
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    zlog_debug!("Ranked {} work items at {}", entries.len(), now);
    entries
}

pub fn ranked_ids(entries: &[QueueEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}
