//! Correlation analyzer (periodic class): sleep quality vs prior-day
//! stress. Builds per-day pairs from historical health snapshots and
//! reports a Pearson correlation once enough days are on record.

use anyhow::Result;
use chrono::{FixedOffset, NaiveDate};
use serde_json::json;
use std::collections::BTreeMap;

use super::{was_delivered_recently, Analyzer, AnalyzerContext, Schedule};
use crate::config::Config;
use crate::insight::{Insight, Priority};

const DEDUPE_KEY: &str = "corr:sleep_stress";
const DEDUPE_WINDOW_HOURS: f64 = 168.0; // one report per week at most

pub struct SleepStressAnalyzer {
    tz: FixedOffset,
    lookback_days: u32,
    min_samples: u32,
    interval_hours: u32,
    enabled: bool,
}

impl SleepStressAnalyzer {
    pub fn from_config(cfg: &Config, tz: FixedOffset) -> Self {
        let a = cfg.analyzer("sleep_stress");
        Self {
            tz,
            lookback_days: a.lookback_days.unwrap_or(14),
            min_samples: a.min_samples.unwrap_or(7),
            interval_hours: a.interval_hours.unwrap_or(24.0) as u32,
            enabled: a.enabled,
        }
    }

    /// Daily (sleep_score, stress_avg) readings keyed by engine-local date.
    fn daily_readings(
        &self,
        cx: &AnalyzerContext<'_>,
    ) -> Result<BTreeMap<NaiveDate, (Option<f64>, Option<f64>)>> {
        let hours = f64::from(self.lookback_days) * 24.0;
        let snaps = cx.store.snapshots_since("health", hours, 400)?;
        let mut days: BTreeMap<NaiveDate, (Option<f64>, Option<f64>)> = BTreeMap::new();
        // Newest-first; keep the latest reading per day.
        for s in snaps {
            let day = s.captured_at.with_timezone(&self.tz).date_naive();
            let entry = days.entry(day).or_default();
            if entry.0.is_none() {
                entry.0 = s.payload.get("sleep_score").and_then(|v| v.as_f64());
            }
            if entry.1.is_none() {
                entry.1 = s.payload.get("stress_avg").and_then(|v| v.as_f64());
            }
        }
        Ok(days)
    }
}

#[async_trait::async_trait]
impl Analyzer for SleepStressAnalyzer {
    fn name(&self) -> &str {
        "sleep_stress"
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
        let days = self.daily_readings(cx)?;

        // Pair today's sleep with yesterday's stress.
        let mut xs = Vec::new(); // prior-day stress
        let mut ys = Vec::new(); // sleep score
        for (day, (sleep, _)) in &days {
            let Some(sleep) = sleep else { continue };
            let prev = *day - chrono::Duration::days(1);
            let Some((_, Some(stress))) = days.get(&prev) else {
                continue;
            };
            xs.push(*stress);
            ys.push(*sleep);
        }

        if (xs.len() as u32) < self.min_samples {
            tracing::debug!(pairs = xs.len(), need = self.min_samples, "not enough pairs");
            return Ok(Vec::new());
        }
        let Some(r) = pearson(&xs, &ys) else {
            return Ok(Vec::new());
        };
        if r.abs() <= 0.5 {
            return Ok(Vec::new());
        }
        if was_delivered_recently(cx.store, DEDUPE_KEY, DEDUPE_WINDOW_HOURS) {
            return Ok(Vec::new());
        }

        let direction = if r < 0.0 { "worse" } else { "better" };
        let priority = if r.abs() >= 0.7 {
            Priority::Medium
        } else {
            Priority::Low
        };
        Ok(vec![Insight::new(
            "correlation",
            "health",
            priority,
            "Sleep tracks prior-day stress",
            format!(
                "Across the last {} days, higher stress the day before predicts {} sleep (r = {:+.2}, n = {}).",
                self.lookback_days,
                direction,
                r,
                xs.len()
            ),
        )
        .with_confidence(r.abs() as f32)
        .with_data(json!({"r": r, "n": xs.len(), "lookback_days": self.lookback_days}))
        .with_dedupe_key(DEDUPE_KEY)
        .expires_in_hours(48)])
    }
}

/// Pearson correlation coefficient; `None` when a series is constant or
/// the inputs are too short.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
