//! orchestrator.rs — the engine loop.
//!
//! One tick: run due collectors, persist snapshots, run due analyzers over
//! fresh + historical data, classify each candidate insight and execute its
//! disposition, re-check the held-back queue, then fire any due report.
//! Every stage failure is absorbed and logged; a tick never aborts.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use metrics::{counter, gauge, histogram};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::analyze::{
    agenda::MorningAgendaAnalyzer, correlation::SleepStressAnalyzer, run_analyzer,
    staleness::StaleSourceAnalyzer, threshold::ThresholdAnalyzer, trend::DiskTrendAnalyzer,
    Analyzer, AnalyzerContext, Schedule,
};
use crate::collect::{build_collector, Collector};
use crate::config::Config;
use crate::decide::{DecisionEngine, Disposition};
use crate::insight::Snapshot;
use crate::notify::{build_channels, DeliveryManager};
use crate::report::ReportScheduler;
use crate::store::Store;

/// Wall-clock match tolerance for fixed-time analyzer runs.
const SCHEDULED_TOLERANCE_MINUTES: i64 = 2;

struct CollectorJob {
    collector: Box<dyn Collector>,
    interval: Duration,
    next_run: DateTime<Utc>,
    initialized: bool,
}

pub struct Orchestrator {
    store: Store,
    collectors: Vec<CollectorJob>,
    analyzers: Vec<Box<dyn Analyzer>>,
    engine: DecisionEngine,
    delivery: DeliveryManager,
    reports: ReportScheduler,
    tick_interval: Duration,
    slow_tick: Duration,
    retention_days: u32,
    tz: FixedOffset,
    /// Last run per periodic analyzer.
    last_periodic: HashMap<String, DateTime<Utc>>,
    /// Local date of the last run per fixed-time analyzer.
    last_scheduled: HashMap<String, NaiveDate>,
    last_cleanup: Option<NaiveDate>,
}

impl Orchestrator {
    /// Wire the full pipeline from config. Collector and channel construction
    /// happens here so misconfiguration fails at startup, not mid-tick.
    pub async fn build(cfg: &Config) -> Result<Self> {
        let store = Store::open(std::path::Path::new(&cfg.store.path)).context("open store")?;
        let tz = cfg.engine.utc_offset()?;

        let mut collectors = Vec::new();
        let now = Utc::now();
        for src in cfg.sources.iter().filter(|s| s.enabled) {
            let collector =
                build_collector(src).with_context(|| format!("source {}", src.name))?;
            collectors.push(CollectorJob {
                collector,
                interval: Duration::from_secs(src.interval_minutes * 60),
                next_run: now,
                initialized: false,
            });
        }

        let channels = build_channels(cfg);
        tracing::info!(
            channels = ?channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            sources = collectors.len(),
            "pipeline wired"
        );
        let delivery = DeliveryManager::new(channels, cfg, store.clone());
        let engine = DecisionEngine::from_config(cfg)?;
        let reports = ReportScheduler::load(cfg).await?;
        let analyzers = default_analyzers(cfg, tz);

        Ok(Self {
            store,
            collectors,
            analyzers,
            engine,
            delivery,
            reports,
            tick_interval: Duration::from_secs(cfg.engine.tick_secs),
            slow_tick: Duration::from_secs(cfg.engine.slow_tick_secs),
            retention_days: cfg.engine.retention_days,
            tz,
            last_periodic: HashMap::new(),
            last_scheduled: HashMap::new(),
            last_cleanup: None,
        })
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        crate::metrics::ensure_metrics_described();
        match self.store.cleanup_old_snapshots(self.retention_days) {
            Ok(n) if n > 0 => tracing::info!(removed = n, "startup retention sweep"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = ?e, "startup retention sweep failed"),
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown requested; stopping engine loop");
                        break;
                    }
                }
            }
        }
    }

    /// One engine tick. Public so integration tests can drive the pipeline
    /// with a controlled clock.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let started = Instant::now();

        let fresh = self.collect_due(now).await;
        self.maintain(now);
        self.analyze_and_dispatch(&fresh, now).await;
        self.release_queued(now).await;
        self.reports.check_and_send(&self.store, &self.delivery, now).await;

        let elapsed = started.elapsed();
        histogram!("vigil_tick_ms").record(elapsed.as_millis() as f64);
        gauge!("vigil_last_tick_ts").set(now.timestamp() as f64);
        if elapsed > self.slow_tick {
            tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "slow tick");
        }
    }

    /// Run every due collector; returns fresh payloads keyed by source name.
    async fn collect_due(&mut self, now: DateTime<Utc>) -> HashMap<String, Value> {
        let mut fresh = HashMap::new();
        for job in &mut self.collectors {
            if now < job.next_run {
                continue;
            }
            let name = job.collector.name().to_string();
            if !job.initialized {
                // Retried every tick until it sticks; the source just stays
                // dark in the meantime.
                if let Err(e) = job.collector.initialize().await {
                    tracing::warn!(source = %name, error = ?e, "collector init failed");
                    counter!("vigil_collector_errors_total").increment(1);
                    continue;
                }
                job.initialized = true;
            }
            job.next_run = now + chrono::Duration::from_std(job.interval).unwrap_or_default();
            match job.collector.collect().await {
                Ok(Some(payload)) => {
                    let snap = Snapshot::new(&name, payload.clone());
                    match self.store.save_snapshot(&snap) {
                        Ok(_) => {
                            counter!("vigil_snapshots_total").increment(1);
                            fresh.insert(name, payload);
                        }
                        Err(e) => {
                            tracing::warn!(source = %name, error = ?e, "snapshot not persisted")
                        }
                    }
                }
                Ok(None) => tracing::debug!(source = %name, "nothing to record"),
                Err(e) => {
                    tracing::warn!(source = %name, error = ?e, "collect failed");
                    counter!("vigil_collector_errors_total").increment(1);
                }
            }
        }
        fresh
    }

    /// Once per local day: drop snapshots past the retention window.
    fn maintain(&mut self, now: DateTime<Utc>) {
        let today = self.engine.local_date(now);
        if self.last_cleanup == Some(today) {
            return;
        }
        self.last_cleanup = Some(today);
        match self.store.cleanup_old_snapshots(self.retention_days) {
            Ok(n) if n > 0 => tracing::info!(removed = n, "retention sweep"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = ?e, "retention sweep failed"),
        }
    }

    async fn analyze_and_dispatch(&mut self, fresh: &HashMap<String, Value>, now: DateTime<Utc>) {
        let cx = AnalyzerContext {
            store: &self.store,
            fresh,
            now,
        };
        let mut produced = Vec::new();
        for analyzer in &self.analyzers {
            if !analyzer.enabled() {
                continue;
            }
            let name = analyzer.name().to_string();
            let due = match analyzer.schedule() {
                Schedule::Realtime => !fresh.is_empty(),
                Schedule::Periodic { hours } => {
                    periodic_due(self.last_periodic.get(&name).copied(), now, hours)
                }
                Schedule::Scheduled { at } => {
                    let local = now.with_timezone(&self.tz);
                    scheduled_due(
                        self.last_scheduled.get(&name).copied(),
                        local.date_naive(),
                        local.time(),
                        at,
                    )
                }
            };
            if !due {
                continue;
            }
            match analyzer.schedule() {
                Schedule::Periodic { .. } => {
                    self.last_periodic.insert(name.clone(), now);
                }
                Schedule::Scheduled { .. } => {
                    self.last_scheduled
                        .insert(name.clone(), self.engine.local_date(now));
                }
                Schedule::Realtime => {}
            }
            let outcome = run_analyzer(analyzer.as_ref(), &cx).await;
            produced.extend(outcome.insights);
        }

        for insight in produced {
            counter!("vigil_insights_total").increment(1);
            self.dispatch(insight, now).await;
        }
    }

    /// Classify one insight and execute its disposition. Skips are dropped
    /// before persisting so duplicates do not pile up as batch candidates.
    async fn dispatch(&self, insight: crate::insight::Insight, now: DateTime<Utc>) {
        let disposition = self.engine.classify(&self.store, &insight, now);
        if disposition == Disposition::Skip {
            tracing::debug!(title = %insight.title, "insight skipped");
            return;
        }
        let mut insight = insight;
        match self.store.save_insight(&insight) {
            Ok(id) => insight.id = Some(id),
            Err(e) => {
                tracing::warn!(title = %insight.title, error = ?e, "insight not persisted");
                return;
            }
        }
        match disposition {
            Disposition::DeliverNow => {
                let outcome = self
                    .delivery
                    .deliver_now(&insight, self.engine.local_date(now))
                    .await;
                if !outcome.ok() {
                    tracing::warn!(title = %insight.title, "delivery failed on all channels");
                }
            }
            Disposition::QueueLater => {
                tracing::debug!(title = %insight.title, "insight held for later");
                self.engine.queue_later(insight);
            }
            Disposition::BatchReport => {
                // Stays undelivered in the store; the next report folds it in.
                tracing::debug!(title = %insight.title, "insight batched for report");
            }
            Disposition::Skip => unreachable!("skip handled before persist"),
        }
    }

    async fn release_queued(&self, now: DateTime<Utc>) {
        for insight in self.engine.pending_for_delivery(&self.store, now) {
            let outcome = self
                .delivery
                .deliver_now(&insight, self.engine.local_date(now))
                .await;
            if !outcome.ok() {
                tracing::warn!(title = %insight.title, "queued delivery failed; re-holding");
                self.engine.queue_later(insight);
            }
        }
    }
}

/// The built-in analyzer set, each reading its own config section.
fn default_analyzers(cfg: &Config, tz: FixedOffset) -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(ThresholdAnalyzer::from_config(cfg)),
        Box::new(SleepStressAnalyzer::from_config(cfg, tz)),
        Box::new(DiskTrendAnalyzer::from_config(cfg)),
        Box::new(StaleSourceAnalyzer::from_config(cfg)),
        Box::new(MorningAgendaAnalyzer::from_config(cfg, tz)),
    ]
}

fn periodic_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, hours: u32) -> bool {
    match last {
        None => true,
        Some(last) => now - last >= chrono::Duration::hours(i64::from(hours)),
    }
}

fn scheduled_due(
    last_date: Option<NaiveDate>,
    today: NaiveDate,
    local_time: chrono::NaiveTime,
    at: chrono::NaiveTime,
) -> bool {
    if last_date == Some(today) {
        return false;
    }
    (local_time - at).num_minutes().abs() <= SCHEDULED_TOLERANCE_MINUTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, h, m, 0).unwrap()
    }

    #[test]
    fn periodic_runs_first_time_then_waits() {
        assert!(periodic_due(None, utc(10, 0), 6));
        assert!(!periodic_due(Some(utc(10, 0)), utc(12, 0), 6));
        assert!(periodic_due(Some(utc(10, 0)), utc(16, 0), 6));
    }

    #[test]
    fn scheduled_fires_within_tolerance_once() {
        let at = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 9, 6).unwrap();
        let t = NaiveTime::from_hms_opt(7, 1, 0).unwrap();
        assert!(scheduled_due(None, today, t, at));
        // Already ran today.
        assert!(!scheduled_due(Some(today), today, t, at));
        // Out of tolerance.
        let late = NaiveTime::from_hms_opt(7, 10, 0).unwrap();
        assert!(!scheduled_due(None, today, late, at));
    }
}
