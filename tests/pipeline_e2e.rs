// tests/pipeline_e2e.rs
//
// Full pipeline over an in-memory store: a fresh infra payload with a disk
// at 97% must end as exactly one delivered insight, and the same condition
// minutes later must not produce a second delivery.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use vigil::analyze::threshold::ThresholdAnalyzer;
use vigil::analyze::{run_analyzer, AnalyzerContext};
use vigil::config::Config;
use vigil::decide::{DecisionEngine, Disposition};
use vigil::insight::{Insight, Priority, Snapshot};
use vigil::notify::{AlertLevel, Channel, DeliveryManager, ReportKind};
use vigil::report::ReportScheduler;
use vigil::store::Store;

const CONFIG: &str = r#"
[engine]
timezone = "+00:00"

[decision]
max_per_day = 5
quiet_start = "22:00"
quiet_end = "07:00"
cooldown_minutes = 240

[[source]]
name = "infra"
kind = "infra"
interval_minutes = 15

[thresholds.disk_used]
source = "infra"
path = "servers/*/disk_used_pct"
warning = 85.0
critical = 95.0
unit = "%"
"#;

#[derive(Default)]
struct RecordingChannel {
    insights: Arc<Mutex<Vec<String>>>,
    reports: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }
    async fn send_insight(&self, insight: &Insight) -> anyhow::Result<()> {
        self.insights.lock().unwrap().push(insight.title.clone());
        Ok(())
    }
    async fn send_alert(&self, _message: &str, _level: AlertLevel) -> anyhow::Result<()> {
        Ok(())
    }
    async fn send_report(&self, text: &str, _kind: ReportKind) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn infra_payload(disk_pct: f64) -> serde_json::Value {
    json!({
        "servers": {
            "web": {"up": true, "disk_used_pct": disk_pct, "cpu_pct": 12.0}
        }
    })
}

/// A fixed mid-afternoon instant keeps the quiet-hours and budget branches
/// deterministic no matter when the test runs.
fn daytime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 14, 0, 0).unwrap()
}

async fn run_threshold_pass(
    cfg: &Config,
    store: &Store,
    engine: &DecisionEngine,
    mgr: &DeliveryManager,
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> usize {
    store
        .save_snapshot(&Snapshot::new("infra", payload.clone()))
        .unwrap();
    let mut fresh = HashMap::new();
    fresh.insert("infra".to_string(), payload);

    let analyzer = ThresholdAnalyzer::from_config(cfg);
    let cx = AnalyzerContext {
        store,
        fresh: &fresh,
        now,
    };
    let outcome = run_analyzer(&analyzer, &cx).await;
    assert!(!outcome.failed);

    let mut delivered = 0;
    for mut insight in outcome.insights {
        match engine.classify(store, &insight, now) {
            Disposition::DeliverNow => {
                insight.id = Some(store.save_insight(&insight).unwrap());
                if mgr.deliver_now(&insight, engine.local_date(now)).await.ok() {
                    delivered += 1;
                }
            }
            other => panic!("unexpected disposition in daytime test: {other:?}"),
        }
    }
    delivered
}

#[tokio::test]
async fn disk_full_condition_is_delivered_exactly_once() {
    let cfg = Config::from_toml_str(CONFIG).unwrap();
    let store = Store::open_in_memory().unwrap();
    let engine = DecisionEngine::from_config(&cfg).unwrap();
    let channel = RecordingChannel::default();
    let insights_seen = channel.insights.clone();
    let mgr = DeliveryManager::new(vec![Box::new(channel)], &cfg, store.clone());

    let first =
        run_threshold_pass(&cfg, &store, &engine, &mgr, infra_payload(97.0), daytime()).await;
    assert_eq!(first, 1);
    {
        let seen = insights_seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("disk_used on web"));
    }

    // Same condition a few minutes later: the analyzer's cooldown suppresses
    // it before it ever reaches the decision engine.
    let now = daytime() + chrono::Duration::minutes(5);
    let mut fresh = HashMap::new();
    fresh.insert("infra".to_string(), infra_payload(97.0));
    let analyzer = ThresholdAnalyzer::from_config(&cfg);
    let cx = AnalyzerContext {
        store: &store,
        fresh: &fresh,
        now,
    };
    let second = run_analyzer(&analyzer, &cx).await;
    assert!(second.insights.is_empty());
    assert_eq!(insights_seen.lock().unwrap().len(), 1);

    // Audit trail: one delivery row, insight marked delivered, budget bumped.
    let rows = store.deliveries_since(1.0).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].success);
    assert!(store.undelivered_since(24.0, 10).unwrap().is_empty());
    assert_eq!(
        store
            .today_budget(engine.local_date(now), 5)
            .unwrap()
            .count,
        1
    );
}

#[tokio::test]
async fn recovered_metric_produces_no_insight() {
    let cfg = Config::from_toml_str(CONFIG).unwrap();
    let store = Store::open_in_memory().unwrap();

    let mut fresh = HashMap::new();
    fresh.insert("infra".to_string(), infra_payload(42.0));
    let analyzer = ThresholdAnalyzer::from_config(&cfg);
    let cx = AnalyzerContext {
        store: &store,
        fresh: &fresh,
        now: Utc::now(),
    };
    let outcome = run_analyzer(&analyzer, &cx).await;
    assert!(outcome.insights.is_empty());
}

#[tokio::test]
async fn batched_insight_lands_in_the_evening_report_and_is_marked_delivered() {
    let tmp = tempfile::tempdir().unwrap();
    let config = format!(
        r#"
[engine]
timezone = "+00:00"

[store]
path = "{db}"
report_state_path = "{state}"

[reports]
morning = "07:30"
evening = "21:30"
weekly_day = "Sun"
weekly_time = "18:00"
"#,
        db = tmp.path().join("vigil.db").display(),
        state = tmp.path().join("last_reports.json").display(),
    );
    let cfg = Config::from_toml_str(&config).unwrap();
    let store = Store::open_in_memory().unwrap();
    let channel = RecordingChannel::default();
    let reports_seen = channel.reports.clone();
    let mgr = DeliveryManager::new(vec![Box::new(channel)], &cfg, store.clone());
    let reports = ReportScheduler::load(&cfg).await.unwrap();

    // A low-priority insight sits undelivered, waiting for a report.
    let low = Insight::new("threshold", "infra", Priority::Low, "CPU warm", "cpu at 82%");
    let id = store.save_insight(&low).unwrap();

    // Drive the scheduler at evening-report time.
    let now = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(21, 30, 0)
        .unwrap()
        .and_utc();
    reports.check_and_send(&store, &mgr, now).await;

    let seen = reports_seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("CPU warm"));
    drop(seen);
    assert!(store.get_insight(id).unwrap().unwrap().delivered);

    // Second pass in the same window: nothing more goes out.
    reports.check_and_send(&store, &mgr, now).await;
    assert_eq!(reports_seen.lock().unwrap().len(), 1);
}
