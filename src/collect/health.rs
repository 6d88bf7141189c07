//! Health telemetry collector. Pulls the daily summary endpoint of a
//! wearable sync agent and keeps only the metrics the analyzers read.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::require_url;
use crate::config::SourceConfig;

pub struct HealthCollector {
    name: String,
    url: String,
    client: Client,
}

/// Tolerant shape of the upstream summary; unknown fields ignored.
#[derive(Debug, Deserialize)]
struct HealthSummary {
    #[serde(default)]
    sleep_score: Option<f64>,
    #[serde(default)]
    stress_avg: Option<f64>,
    #[serde(default)]
    resting_hr: Option<f64>,
    #[serde(default)]
    steps: Option<u64>,
    #[serde(default)]
    measured_at: Option<String>,
}

impl HealthCollector {
    pub fn new(cfg: &SourceConfig, client: Client) -> Result<Self> {
        Ok(Self {
            name: cfg.name.clone(),
            url: require_url(cfg)?,
            client,
        })
    }

    fn normalize(s: HealthSummary) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(v) = s.sleep_score {
            map.insert("sleep_score".into(), json!(v));
        }
        if let Some(v) = s.stress_avg {
            map.insert("stress_avg".into(), json!(v));
        }
        if let Some(v) = s.resting_hr {
            map.insert("resting_hr".into(), json!(v));
        }
        if let Some(v) = s.steps {
            map.insert("steps".into(), json!(v));
        }
        if let Some(v) = s.measured_at {
            map.insert("measured_at".into(), json!(v));
        }
        Value::Object(map)
    }
}

#[async_trait::async_trait]
impl super::Collector for HealthCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Option<Value>> {
        let summary: HealthSummary = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("health fetch")?
            .error_for_status()
            .context("health non-2xx")?
            .json()
            .await
            .context("health parse")?;
        let payload = Self::normalize(summary);
        if payload.as_object().map(|m| m.is_empty()).unwrap_or(true) {
            return Ok(None);
        }
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_absent_metrics() {
        let s: HealthSummary = serde_json::from_str(
            r#"{"sleep_score": 81.5, "steps": 9200, "battery": 40}"#,
        )
        .unwrap();
        let v = HealthCollector::normalize(s);
        assert_eq!(v["sleep_score"], json!(81.5));
        assert_eq!(v["steps"], json!(9200));
        assert!(v.get("stress_avg").is_none());
        assert!(v.get("battery").is_none());
    }
}
