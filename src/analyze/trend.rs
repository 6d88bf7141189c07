//! Trend/prediction analyzer (periodic class): per-server disk growth.
//! Fits a linear rate from the first and last samples in the lookback
//! window and alerts when the projection crosses full inside the horizon.

use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;

use super::{was_delivered_recently, Analyzer, AnalyzerContext, Schedule};
use crate::config::Config;
use crate::insight::{Insight, Priority};

const DEDUPE_WINDOW_HOURS: f64 = 24.0;

pub struct DiskTrendAnalyzer {
    lookback_days: u32,
    horizon_days: f64,
    interval_hours: u32,
    enabled: bool,
}

/// Projection for one server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub current_pct: f64,
    pub rate_per_day: f64,
    pub days_to_full: f64,
}

/// Linear projection from (first, last) samples `span_days` apart.
/// `None` when usage is flat or shrinking, or the span is degenerate.
pub fn project(first_pct: f64, last_pct: f64, span_days: f64) -> Option<Projection> {
    if span_days <= 0.0 {
        return None;
    }
    let rate = (last_pct - first_pct) / span_days;
    if rate <= 0.0 {
        return None;
    }
    Some(Projection {
        current_pct: last_pct,
        rate_per_day: rate,
        days_to_full: (100.0 - last_pct) / rate,
    })
}

impl DiskTrendAnalyzer {
    pub fn from_config(cfg: &Config) -> Self {
        let a = cfg.analyzer("disk_trend");
        Self {
            lookback_days: a.lookback_days.unwrap_or(7),
            horizon_days: a.horizon_days.unwrap_or(14.0),
            interval_hours: a.interval_hours.unwrap_or(6.0) as u32,
            enabled: a.enabled,
        }
    }

    fn priority_for(&self, days_to_full: f64) -> Priority {
        if days_to_full <= 3.0 {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for DiskTrendAnalyzer {
    fn name(&self) -> &str {
        "disk_trend"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Periodic {
            hours: self.interval_hours,
        }
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn analyze(&self, cx: &AnalyzerContext<'_>) -> Result<Vec<Insight>> {
        let hours = f64::from(self.lookback_days) * 24.0;
        let snaps = cx.store.snapshots_since("infra", hours, 500)?;
        if snaps.len() < 2 {
            return Ok(Vec::new());
        }

        // Newest-first → (last, first) per server.
        let mut series: BTreeMap<String, (f64, i64, f64, i64)> = BTreeMap::new();
        for s in &snaps {
            let Some(servers) = s.payload.get("servers").and_then(|v| v.as_object()) else {
                continue;
            };
            let ts = s.captured_at.timestamp();
            for (name, metrics) in servers {
                let Some(pct) = metrics.get("disk_used_pct").and_then(|v| v.as_f64()) else {
                    continue;
                };
                series
                    .entry(name.clone())
                    .and_modify(|e| {
                        // Keep overwriting the "first" slot; last row wins = oldest.
                        e.2 = pct;
                        e.3 = ts;
                    })
                    .or_insert((pct, ts, pct, ts));
            }
        }

        let mut out = Vec::new();
        for (server, (last_pct, last_ts, first_pct, first_ts)) in series {
            let span_days = (last_ts - first_ts) as f64 / 86_400.0;
            let Some(p) = project(first_pct, last_pct, span_days) else {
                continue;
            };
            if p.days_to_full > self.horizon_days {
                continue;
            }
            let key = format!("trend:disk_full:{server}");
            if was_delivered_recently(cx.store, &key, DEDUPE_WINDOW_HOURS) {
                continue;
            }
            out.push(
                Insight::new(
                    "trend",
                    "infra",
                    self.priority_for(p.days_to_full),
                    format!("Disk on {server} filling up"),
                    format!(
                        "{server} is at {:.1}% and growing {:.2}%/day; full in about {:.0} days.",
                        p.current_pct, p.rate_per_day, p.days_to_full
                    ),
                )
                .with_data(json!({
                    "server": server,
                    "current_pct": p.current_pct,
                    "rate_per_day": p.rate_per_day,
                    "days_to_full": p.days_to_full,
                }))
                .with_dedupe_key(key)
                .expires_in_hours(24),
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

    #[test]
    fn projection_math() {
        let p = project(80.0, 90.0, 5.0).unwrap();
        assert!((p.rate_per_day - 2.0).abs() < 1e-9);
        assert!((p.days_to_full - 5.0).abs() < 1e-9);
        assert!(project(90.0, 80.0, 5.0).is_none()); // shrinking
        assert!(project(80.0, 90.0, 0.0).is_none()); // degenerate span
    }

    fn seed(store: &Store, server: &str, first: f64, last: f64, span_days: i64) {
        let mut old = Snapshot::new(
            "infra",
            serde_json::json!({"servers": {server: {"disk_used_pct": first}}}),
        );
        old.captured_at = Utc::now() - Duration::days(span_days);
        store.save_snapshot(&old).unwrap();
        let recent = Snapshot::new(
            "infra",
            serde_json::json!({"servers": {server: {"disk_used_pct": last}}}),
        );
        store.save_snapshot(&recent).unwrap();
    }

    fn analyzer() -> DiskTrendAnalyzer {
        DiskTrendAnalyzer {
            lookback_days: 7,
            horizon_days: 14.0,
            interval_hours: 6,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn alerts_inside_horizon_with_high_priority_when_imminent() {
        let store = Store::open_in_memory().unwrap();
        // 90 → 96 over 3 days: 2%/day, ~2 days to full.
        seed(&store, "db-1", 90.0, 96.0, 3);
        let fresh = HashMap::new();
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        let out = analyzer().analyze(&cx).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].priority, Priority::High);
        assert_eq!(out[0].dedupe_key.as_deref(), Some("trend:disk_full:db-1"));
    }

    #[tokio::test]
    async fn silent_when_projection_outside_horizon() {
        let store = Store::open_in_memory().unwrap();
        // 50 → 52 over 6 days: ~144 days to full.
        seed(&store, "db-1", 50.0, 52.0, 6);
        let fresh = HashMap::new();
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        assert!(analyzer().analyze(&cx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn silent_when_usage_flat() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "db-1", 70.0, 70.0, 5);
        let fresh = HashMap::new();
        let cx = AnalyzerContext {
            store: &store,
            fresh: &fresh,
            now: Utc::now(),
        };
        assert!(analyzer().analyze(&cx).await.unwrap().is_empty());
    }
}
