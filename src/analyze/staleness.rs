//! Staleness analyzer (real-time class). Surfaces persistent source
//! failure through the normal insight path: when the newest snapshot for a
//! source is older than its freshness threshold, emit a Medium "source
//! stale" insight instead of throwing anywhere.

use anyhow::Result;
use serde_json::json;

use super::{was_delivered_recently, Analyzer, AnalyzerContext, Schedule};
use crate::config::Config;
use crate::insight::{Insight, Priority};

const DEDUPE_WINDOW_HOURS: f64 = 12.0;

pub struct StaleSourceAnalyzer {
    /// (source name, freshness threshold in hours)
    watched: Vec<(String, f64)>,
    enabled: bool,
}

impl StaleSourceAnalyzer {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            watched: cfg
                .sources
                .iter()
                .filter(|s| s.enabled)
                .map(|s| (s.name.clone(), s.freshness_hours))
                .collect(),
            enabled: cfg.analyzer("staleness").enabled,
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for StaleSourceAnalyzer {
    fn name(&self) -> &str {
        "staleness"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Realtime
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn analyze(&self, cx: &AnalyzerContext<'_>) -> Result<Vec<Insight>> {
        let mut out = Vec::new();
        for (source, freshness_hours) in &self.watched {
            // A fresh payload this tick clears the condition by definition.
            if cx.fresh.contains_key(source) {
                continue;
            }
            let age_hours = match cx.store.latest_snapshot(source)? {
                Some(snap) => (cx.now - snap.captured_at).num_seconds() as f64 / 3600.0,
                // Never collected: stale only once the engine has been up
                // long enough for the threshold to apply, which we cannot
                // know here; skip rather than alarm on first boot.
                None => continue,
            };
            if age_hours <= *freshness_hours {
                continue;
            }
            let key = format!("stale:{source}");
            if was_delivered_recently(cx.store, &key, DEDUPE_WINDOW_HOURS) {
                continue;
            }
            out.push(
                Insight::new(
                    "staleness",
                    source.clone(),
                    Priority::Medium,
                    format!("Source {source} is stale"),
                    format!(
                        "No data from {source} for {age_hours:.1} h (freshness threshold {freshness_hours:.1} h)."
                    ),
                )
                .with_data(json!({
                    "source": source,
                    "age_hours": age_hours,
                    "freshness_hours": freshness_hours,
                }))
                .with_dedupe_key(key)
                .expires_in_hours(12),
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::Snapshot;
    use crate::store::Store;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn analyzer() -> StaleSourceAnalyzer {
        StaleSourceAnalyzer {
            watched: vec![("health".to_string(), 6.0)],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn old_snapshot_surfaces_stale_insight() {
        let store = Store::open_in_memory().unwrap();
        let mut snap = Snapshot::new("health", serde_json::json!({"sleep_score": 80}));
        snap.captured_at = Utc::now() - Duration::hours(10);
        store.save_snapshot(&snap).unwrap();

        let fresh = HashMap::new();
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        let out = analyzer().analyze(&cx).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].priority, Priority::Medium);
        assert_eq!(out[0].dedupe_key.as_deref(), Some("stale:health"));
    }

    #[tokio::test]
    async fn fresh_tick_data_clears_condition() {
        let store = Store::open_in_memory().unwrap();
        let mut snap = Snapshot::new("health", serde_json::json!({}));
        snap.captured_at = Utc::now() - Duration::hours(10);
        store.save_snapshot(&snap).unwrap();

        let mut fresh = HashMap::new();
        fresh.insert("health".to_string(), serde_json::json!({"sleep_score": 81}));
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        assert!(analyzer().analyze(&cx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn never_collected_source_is_not_reported() {
        let store = Store::open_in_memory().unwrap();
        let fresh = HashMap::new();
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        assert!(analyzer().analyze(&cx).await.unwrap().is_empty());
    }
}
