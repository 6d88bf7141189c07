//! Collectors: one per external data source. Each fetch normalizes the
//! source's wire format into a generic nested-map payload; every external
//! call is caught at this boundary and reduced to an error the orchestrator
//! logs and skips, so a failing source never blocks the others.

pub mod calendar;
pub mod health;
pub mod infra;
pub mod weather;

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

use crate::config::SourceConfig;

/// Default per-request timeout bounding worst-case tick duration.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// One-time setup (client checks, token reads). Failures are retried
    /// lazily before the next collect.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch current state. `Ok(None)` means "nothing to record right now"
    /// (e.g. empty agenda source) and is not an error.
    async fn collect(&self) -> Result<Option<Value>>;
}

/// Build the collector registered for `cfg.kind`. Unknown kinds fail fast
/// at startup instead of at fetch time.
pub fn build_collector(cfg: &SourceConfig) -> Result<Box<dyn Collector>> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(anyhow::Error::from)?;
    match cfg.kind.as_str() {
        "health" => Ok(Box::new(health::HealthCollector::new(cfg, client)?)),
        "calendar" => Ok(Box::new(calendar::CalendarCollector::new(cfg, client)?)),
        "weather" => Ok(Box::new(weather::WeatherCollector::new(cfg, client)?)),
        "infra" => Ok(Box::new(infra::InfraCollector::new(cfg, client))),
        other => Err(anyhow::anyhow!("unknown collector kind: {other}")),
    }
}

pub(crate) fn require_url(cfg: &SourceConfig) -> Result<String> {
    cfg.url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("source {}: missing url", cfg.name))
}
