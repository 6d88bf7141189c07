//! insight.rs — core data model shared by the whole pipeline.
//!
//! A `Snapshot` is what a collector captured, an `Insight` is what a rule
//! wants to tell the user, a `Delivery` is one channel attempt, and `Budget`
//! counts immediate reach-outs per calendar day. Only `Insight.delivered`
//! is ever mutated after creation; everything else is append-only.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A timestamped, source-tagged capture of external data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store-assigned rowid; `None` until persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source: String,
    pub captured_at: DateTime<Utc>,
    /// Normalized nested map produced by the collector.
    pub payload: Value,
}

impl Snapshot {
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            source: source.into(),
            captured_at: Utc::now(),
            payload,
        }
    }
}

/// Notification urgency, ordered most-severe-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(Priority::Urgent),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A candidate notification produced by an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Rule family, e.g. "threshold", "correlation", "trend".
    pub kind: String,
    /// Life domain, e.g. "health", "infra", "calendar", "weather".
    pub category: String,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    /// Confidence in the finding, clamped to <0.0, 1.0>.
    pub confidence: f32,
    /// Structured evidence (metric values, sample counts, ...).
    #[serde(default)]
    pub data: Value,
    pub source_analyzer: String,
    /// Identifies the *condition*, not the instantaneous value, so repeated
    /// violations collapse into one notification per cooldown window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered: bool,
}

impl Insight {
    pub fn new(
        kind: impl Into<String>,
        category: impl Into<String>,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            category: category.into(),
            priority,
            title: title.into(),
            message: message.into(),
            confidence: 1.0,
            data: Value::Null,
            source_analyzer: String::new(),
            dedupe_key: None,
            created_at: Utc::now(),
            expires_at: None,
            delivered: false,
        }
    }

    pub fn with_confidence(mut self, c: f32) -> Self {
        self.confidence = clamp01(c);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn from_analyzer(mut self, name: impl Into<String>) -> Self {
        self.source_analyzer = name.into();
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn expires_in_hours(mut self, hours: i64) -> Self {
        self.expires_at = Some(self.created_at + Duration::hours(hours));
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// One channel attempt for one insight. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub insight_id: i64,
    pub channel: String,
    pub delivered_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Daily immediate reach-out counter, keyed by the engine-local date.
/// `count` may exceed `max_per_day` only through urgent bypasses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub date: NaiveDate,
    pub count: u32,
    pub max_per_day: u32,
    pub consumed_insight_ids: Vec<i64>,
}

impl Budget {
    pub fn remaining(&self) -> u32 {
        self.max_per_day.saturating_sub(self.count)
    }

    pub fn exhausted(&self) -> bool {
        self.count >= self.max_per_day
    }
}

fn clamp01(x: f32) -> f32 {
    if x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}
