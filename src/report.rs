//! report.rs — scheduled digests (morning / evening / weekly).
//!
//! Each report pulls recent insights and snapshots, formats a fixed-section
//! digest where any missing section is silently omitted, and fires at most
//! once per schedule window. "Last sent" bookkeeping lives in a small JSON
//! state file so restarts cannot double-send, independently of the store.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

use crate::config::Config;
use crate::insight::Insight;
use crate::notify::{DeliveryManager, ReportKind};
use crate::store::Store;

/// Wall-clock match tolerance; ticks are coarser than a minute.
const TOLERANCE_MINUTES: i64 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReportState {
    morning: Option<NaiveDate>,
    evening: Option<NaiveDate>,
    weekly: Option<NaiveDate>,
}

impl ReportState {
    fn last_sent(&self, kind: ReportKind) -> Option<NaiveDate> {
        match kind {
            ReportKind::Morning => self.morning,
            ReportKind::Evening => self.evening,
            ReportKind::Weekly => self.weekly,
        }
    }

    fn mark(&mut self, kind: ReportKind, date: NaiveDate) {
        match kind {
            ReportKind::Morning => self.morning = Some(date),
            ReportKind::Evening => self.evening = Some(date),
            ReportKind::Weekly => self.weekly = Some(date),
        }
    }
}

pub struct ReportScheduler {
    morning_at: NaiveTime,
    evening_at: NaiveTime,
    weekly_day: Weekday,
    weekly_at: NaiveTime,
    tz: FixedOffset,
    state_path: PathBuf,
    state: Mutex<ReportState>,
}

impl ReportScheduler {
    pub async fn load(cfg: &Config) -> Result<Self> {
        let (weekly_day, weekly_at) = cfg.reports.weekly_at()?;
        let state_path = PathBuf::from(&cfg.store.report_state_path);
        let state = read_state(&state_path).await;
        Ok(Self {
            morning_at: cfg.reports.morning_at()?,
            evening_at: cfg.reports.evening_at()?,
            weekly_day,
            weekly_at,
            tz: cfg.engine.utc_offset()?,
            state_path,
            state: Mutex::new(state),
        })
    }

    /// Reports due at `now`: time-of-day within tolerance and not already
    /// sent in the current window.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ReportKind> {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();
        let state = self.state.lock().expect("report state mutex poisoned");
        let mut out = Vec::new();
        if near(local.time(), self.morning_at) && state.last_sent(ReportKind::Morning) != Some(today)
        {
            out.push(ReportKind::Morning);
        }
        if near(local.time(), self.evening_at) && state.last_sent(ReportKind::Evening) != Some(today)
        {
            out.push(ReportKind::Evening);
        }
        if local.weekday() == self.weekly_day
            && near(local.time(), self.weekly_at)
            && state.last_sent(ReportKind::Weekly) != Some(today)
        {
            out.push(ReportKind::Weekly);
        }
        out
    }

    /// Check the clock, build and send any due report, persist last-sent.
    /// A window is marked consumed even when the digest came out empty, so
    /// the next tick inside the tolerance does not retry forever.
    pub async fn check_and_send(
        &self,
        store: &Store,
        manager: &DeliveryManager,
        now: DateTime<Utc>,
    ) {
        let today = now.with_timezone(&self.tz).date_naive();
        for kind in self.due(now) {
            match build_report(store, kind, now) {
                Ok(Some((text, batched))) => {
                    if manager.send_report(&text, kind).await {
                        // Insights folded into the digest count as delivered
                        // for dedup purposes.
                        for id in batched {
                            if let Err(e) = store.mark_delivered(id) {
                                tracing::warn!(error = ?e, id, "mark batched insight");
                            }
                        }
                        tracing::info!(report = kind.as_str(), "report sent");
                    }
                }
                Ok(None) => {
                    tracing::debug!(report = kind.as_str(), "nothing to report");
                }
                Err(e) => {
                    tracing::warn!(report = kind.as_str(), error = ?e, "report build failed");
                }
            }
            self.mark_sent(kind, today).await;
        }
    }

    async fn mark_sent(&self, kind: ReportKind, date: NaiveDate) {
        let snapshot = {
            let mut state = self.state.lock().expect("report state mutex poisoned");
            state.mark(kind, date);
            state.clone()
        };
        write_state(&self.state_path, &snapshot).await;
    }
}

fn near(now: NaiveTime, at: NaiveTime) -> bool {
    (now - at).num_minutes().abs() <= TOLERANCE_MINUTES
}

async fn read_state(path: &PathBuf) -> ReportState {
    match fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
        Err(_) => ReportState::default(),
    }
}

async fn write_state(path: &PathBuf, state: &ReportState) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            tracing::warn!("report state dir: {e:#}");
        }
    }
    match serde_json::to_vec_pretty(state) {
        Ok(bytes) => {
            if let Err(e) = fs::write(path, bytes).await {
                tracing::warn!("write report state: {e:#}");
            }
        }
        Err(e) => tracing::warn!("encode report state: {e:#}"),
    }
}

/// Build the digest text plus the ids of batched insights it includes.
/// `None` when every section is missing.
fn build_report(
    store: &Store,
    kind: ReportKind,
    now: DateTime<Utc>,
) -> Result<Option<(String, Vec<i64>)>> {
    let mut sections: Vec<String> = Vec::new();
    let mut batched_ids: Vec<i64> = Vec::new();

    match kind {
        ReportKind::Morning => {
            if let Some(s) = weather_section(store)? {
                sections.push(s);
            }
            if let Some(s) = agenda_section(store)? {
                sections.push(s);
            }
            if let Some(s) = health_section(store)? {
                sections.push(s);
            }
            if let Some(s) = insights_section(store, 24.0, &mut batched_ids)? {
                sections.push(s);
            }
        }
        ReportKind::Evening => {
            if let Some(s) = health_section(store)? {
                sections.push(s);
            }
            if let Some(s) = insights_section(store, 24.0, &mut batched_ids)? {
                sections.push(s);
            }
            if let Some(s) = deliveries_section(store, 24.0)? {
                sections.push(s);
            }
        }
        ReportKind::Weekly => {
            if let Some(s) = insights_section(store, 168.0, &mut batched_ids)? {
                sections.push(s);
            }
            if let Some(s) = deliveries_section(store, 168.0)? {
                sections.push(s);
            }
        }
    }

    if sections.is_empty() {
        return Ok(None);
    }
    let header = format!(
        "{} digest — {}",
        capitalize(kind.as_str()),
        now.format("%Y-%m-%d")
    );
    let mut text = header;
    for s in sections {
        text.push_str("\n\n");
        text.push_str(&s);
    }
    Ok(Some((text, batched_ids)))
}

fn weather_section(store: &Store) -> Result<Option<String>> {
    let Some(snap) = store.latest_snapshot("weather")? else {
        return Ok(None);
    };
    let p = &snap.payload;
    let mut parts = Vec::new();
    if let Some(t) = p.get("temp_c").and_then(|v| v.as_f64()) {
        parts.push(format!("{t:.0}°C"));
    }
    if let Some(r) = p.get("precip_prob").and_then(|v| v.as_f64()) {
        parts.push(format!("{r:.0}% rain"));
    }
    if let Some(s) = p.get("summary").and_then(|v| v.as_str()) {
        parts.push(s.to_string());
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("Weather: {}", parts.join(", "))))
}

fn agenda_section(store: &Store) -> Result<Option<String>> {
    let Some(snap) = store.latest_snapshot("calendar")? else {
        return Ok(None);
    };
    Ok(Some(format!(
        "Agenda:\n{}",
        crate::analyze::agenda::format_agenda(&snap.payload)
    )))
}

fn health_section(store: &Store) -> Result<Option<String>> {
    let Some(snap) = store.latest_snapshot("health")? else {
        return Ok(None);
    };
    let p = &snap.payload;
    let mut parts = Vec::new();
    if let Some(v) = p.get("sleep_score").and_then(|v| v.as_f64()) {
        parts.push(format!("sleep {v:.0}"));
    }
    if let Some(v) = p.get("stress_avg").and_then(|v| v.as_f64()) {
        parts.push(format!("stress {v:.0}"));
    }
    if let Some(v) = p.get("steps").and_then(|v| v.as_u64()) {
        parts.push(format!("{v} steps"));
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("Health: {}", parts.join(", "))))
}

fn insights_section(
    store: &Store,
    hours: f64,
    batched_ids: &mut Vec<i64>,
) -> Result<Option<String>> {
    let pending = store.undelivered_since(hours, 20)?;
    if pending.is_empty() {
        return Ok(None);
    }
    let mut lines = vec!["Noted:".to_string()];
    for i in &pending {
        lines.push(format_insight_line(i));
        if let Some(id) = i.id {
            batched_ids.push(id);
        }
    }
    Ok(Some(lines.join("\n")))
}

fn deliveries_section(store: &Store, hours: f64) -> Result<Option<String>> {
    let rows = store.deliveries_since(hours)?;
    if rows.is_empty() {
        return Ok(None);
    }
    let ok = rows.iter().filter(|d| d.success).count();
    Ok(Some(format!(
        "Notifications: {ok} delivered, {} failed attempts",
        rows.len() - ok
    )))
}

fn format_insight_line(i: &Insight) -> String {
    format!("- [{}] {}: {}", i.priority.as_str(), i.title, i.message)
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::{Priority, Snapshot};
    use chrono::TimeZone;

    fn scheduler(dir: &std::path::Path) -> ReportScheduler {
        ReportScheduler {
            morning_at: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            evening_at: NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
            weekly_day: Weekday::Sun,
            weekly_at: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            tz: FixedOffset::east_opt(0).unwrap(),
            state_path: dir.join("last_reports.json"),
            state: Mutex::new(ReportState::default()),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn due_within_tolerance_once_per_day() {
        let tmp = tempfile::tempdir().unwrap();
        let s = scheduler(tmp.path());
        // 2025-09-06 is a Saturday.
        assert_eq!(s.due(utc(2025, 9, 6, 7, 31)), vec![ReportKind::Morning]);
        assert!(s.due(utc(2025, 9, 6, 7, 40)).is_empty());
        assert!(s.due(utc(2025, 9, 6, 12, 0)).is_empty());

        s.state
            .lock()
            .unwrap()
            .mark(ReportKind::Morning, NaiveDate::from_ymd_opt(2025, 9, 6).unwrap());
        assert!(s.due(utc(2025, 9, 6, 7, 31)).is_empty());
        // Next day fires again.
        assert_eq!(s.due(utc(2025, 9, 7, 7, 29)), vec![ReportKind::Morning]);
    }

    #[test]
    fn weekly_requires_matching_weekday() {
        let tmp = tempfile::tempdir().unwrap();
        let s = scheduler(tmp.path());
        // Saturday 18:00: not due. Sunday 18:01: due.
        assert!(s.due(utc(2025, 9, 6, 18, 0)).is_empty());
        assert_eq!(s.due(utc(2025, 9, 7, 18, 1)), vec![ReportKind::Weekly]);
    }

    #[test]
    fn report_text_omits_missing_sections() {
        let store = Store::open_in_memory().unwrap();
        // Only health data; no weather, calendar, insights.
        store
            .save_snapshot(&Snapshot::new(
                "health",
                serde_json::json!({"sleep_score": 82.0, "steps": 8000}),
            ))
            .unwrap();
        let (text, batched) = build_report(&store, ReportKind::Morning, Utc::now())
            .unwrap()
            .unwrap();
        assert!(text.contains("Health: sleep 82"));
        assert!(!text.contains("Weather"));
        assert!(!text.contains("Agenda"));
        assert!(batched.is_empty());
    }

    #[test]
    fn empty_store_yields_no_report() {
        let store = Store::open_in_memory().unwrap();
        assert!(build_report(&store, ReportKind::Weekly, Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn batched_insights_are_listed_and_returned() {
        let store = Store::open_in_memory().unwrap();
        let i = Insight::new("threshold", "infra", Priority::Low, "CPU warm", "cpu at 82%");
        let id = store.save_insight(&i).unwrap();
        let (text, batched) = build_report(&store, ReportKind::Evening, Utc::now())
            .unwrap()
            .unwrap();
        assert!(text.contains("CPU warm"));
        assert_eq!(batched, vec![id]);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("last_reports.json");
        let state = ReportState {
            morning: Some(NaiveDate::from_ymd_opt(2025, 9, 6).unwrap()),
            ..Default::default()
        };
        write_state(&path, &state).await;
        let loaded = read_state(&path).await;
        assert_eq!(loaded.morning, state.morning);
        assert_eq!(loaded.weekly, None);
    }
}
