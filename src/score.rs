//! Merge-queue priority scoring.
//!
//! ```text
//! score = base
//!       + convoy_age_weight * convoy_age_hours
//!       + priority_weight   * (4 - priority)
//!       - min(retry_penalty * retry_count, max_retry_penalty)
//!       + mr_age_weight     * age_hours
//! ```
//!
//! Old convoys gain score so batches are not starved, urgent priorities
//! (lower numbers) gain score, repeated retries lose score up to a cap, and
//! everything ages upward so nothing waits forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_BASE_SCORE: f64 = 1000.0;
pub const DEFAULT_CONVOY_AGE_WEIGHT: f64 = 10.0;
pub const DEFAULT_PRIORITY_WEIGHT: f64 = 100.0;
pub const DEFAULT_RETRY_PENALTY: f64 = 50.0;
pub const DEFAULT_MR_AGE_WEIGHT: f64 = 1.0;
pub const DEFAULT_MAX_RETRY_PENALTY: f64 = 300.0;

/// Lowest-urgency priority; priorities above this score below the base.
const PRIORITY_FLOOR: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub base_score: f64,
    pub convoy_age_weight: f64,
    pub priority_weight: f64,
    pub retry_penalty: f64,
    pub mr_age_weight: f64,
    pub max_retry_penalty: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            base_score: DEFAULT_BASE_SCORE,
            convoy_age_weight: DEFAULT_CONVOY_AGE_WEIGHT,
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
            retry_penalty: DEFAULT_RETRY_PENALTY,
            mr_age_weight: DEFAULT_MR_AGE_WEIGHT,
            max_retry_penalty: DEFAULT_MAX_RETRY_PENALTY,
        }
    }
}

impl ScoreConfig {
    /// Reject weights that would make scoring meaningless. The base may be
    /// any finite value; every weight must be finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        if !self.base_score.is_finite() {
            return Err(Error::Validation("score.base_score must be finite".to_string()));
        }
        let weights = [
            ("convoy_age_weight", self.convoy_age_weight),
            ("priority_weight", self.priority_weight),
            ("retry_penalty", self.retry_penalty),
            ("mr_age_weight", self.mr_age_weight),
            ("max_retry_penalty", self.max_retry_penalty),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "score.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreInput {
    /// 0 is most urgent, 4 least.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub convoy_created_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    /// Evaluation time. `None` means the wall clock.
    pub now: Option<DateTime<Utc>>,
}

fn weight(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Hours from `since` to `now`; timestamps in the future count as zero.
fn hours_since(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - since).num_milliseconds();
    (millis as f64 / 3_600_000.0).max(0.0)
}

pub fn score(input: &ScoreInput, config: &ScoreConfig) -> f64 {
    // The only non-deterministic path: callers that want reproducible
    // scores pass `now`.
    let now = input.now.unwrap_or_else(Utc::now);

    let base = if config.base_score.is_finite() {
        config.base_score
    } else {
        0.0
    };

    let convoy = input
        .convoy_created_at
        .map(|at| weight(config.convoy_age_weight) * hours_since(at, now))
        .unwrap_or(0.0);

    let priority = weight(config.priority_weight) * (PRIORITY_FLOOR - f64::from(input.priority));

    let retry = (weight(config.retry_penalty) * f64::from(input.retry_count))
        .min(weight(config.max_retry_penalty));

    let age = weight(config.mr_age_weight) * hours_since(input.created_at, now);

    base + convoy + priority - retry + age
}

pub fn score_with_defaults(input: &ScoreInput) -> f64 {
    score(input, &ScoreConfig::default())
}

/// A unit of work waiting in the merge queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub convoy_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_priority() -> i32 {
    2
}

impl WorkItem {
    pub fn input_at(&self, now: Option<DateTime<Utc>>) -> ScoreInput {
        ScoreInput {
            priority: self.priority,
            created_at: self.created_at,
            convoy_created_at: self.convoy_created_at,
            retry_count: self.retry_count,
            now,
        }
    }

    pub fn score_at(&self, now: Option<DateTime<Utc>>, config: &ScoreConfig) -> f64 {
        score(&self.input_at(now), config)
    }
}
