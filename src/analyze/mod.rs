//! Analyzers: rule evaluators reading current and/or historical data and
//! emitting candidate insights. Three scheduling classes: real-time (every
//! tick with fresh data), periodic (interval in hours), scheduled (fixed
//! time-of-day, at most once per calendar day).
//!
//! Every analyzer runs behind `run_analyzer`, which times the call and
//! absorbs any failure into zero insights plus a named log entry.

pub mod agenda;
pub mod correlation;
pub mod staleness;
pub mod threshold;
pub mod trend;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, Utc};
use metrics::counter;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use crate::insight::Insight;
use crate::store::Store;

/// Scheduling class of an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Runs whenever a tick produced fresh data for one of its sources.
    Realtime,
    /// Runs when at least `hours` passed since its last run.
    Periodic { hours: u32 },
    /// Runs at `at` (engine-local wall clock, ±2 min), once per day.
    Scheduled { at: NaiveTime },
}

/// What an analyzer gets to look at for one run.
pub struct AnalyzerContext<'a> {
    pub store: &'a Store,
    /// Payloads collected in the current tick, keyed by source name.
    pub fresh: &'a HashMap<String, Value>,
    pub now: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    fn schedule(&self) -> Schedule;
    fn enabled(&self) -> bool {
        true
    }
    async fn analyze(&self, cx: &AnalyzerContext<'_>) -> Result<Vec<Insight>>;
}

/// Outcome of one harnessed analyzer run.
#[derive(Debug)]
pub struct RunOutcome {
    pub insights: Vec<Insight>,
    pub duration_ms: u64,
    pub failed: bool,
}

/// Run one analyzer; any failure yields zero insights and a log entry,
/// never a crashed tick.
pub async fn run_analyzer(analyzer: &dyn Analyzer, cx: &AnalyzerContext<'_>) -> RunOutcome {
    let started = Instant::now();
    let (insights, failed) = match analyzer.analyze(cx).await {
        Ok(mut v) => {
            for i in &mut v {
                if i.source_analyzer.is_empty() {
                    i.source_analyzer = analyzer.name().to_string();
                }
            }
            (v, false)
        }
        Err(e) => {
            tracing::warn!(analyzer = analyzer.name(), error = ?e, "analyzer failed");
            counter!("vigil_analyzer_errors_total").increment(1);
            (Vec::new(), true)
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        analyzer = analyzer.name(),
        insights = insights.len(),
        duration_ms,
        "analyzer run"
    );
    RunOutcome {
        insights,
        duration_ms,
        failed,
    }
}

/// Dedup helper: was an insight with this condition key delivered within
/// the window? Fails open on store faults so a flaky disk cannot silently
/// drop alerts.
pub fn was_delivered_recently(store: &Store, dedupe_key: &str, window_hours: f64) -> bool {
    match store.check_duplicate(dedupe_key, window_hours) {
        Ok(dup) => dup,
        Err(e) => {
            tracing::warn!(dedupe_key, error = ?e, "dedupe lookup failed; treating as fresh");
            false
        }
    }
}
