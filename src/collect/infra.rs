//! Infrastructure collector. Probes each configured server's status URL,
//! records reachability plus latency, and folds in whatever resource
//! metrics the status body exposes. A down server is a data point
//! (`up: false`), never a collect error, so one dead box cannot hide the
//! state of the rest.

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::SourceConfig;

pub struct InfraCollector {
    name: String,
    servers: BTreeMap<String, String>,
    client: Client,
}

#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(alias = "disk_percent")]
    disk_used_pct: Option<f64>,
    #[serde(alias = "memory_percent")]
    mem_used_pct: Option<f64>,
    #[serde(alias = "cpu_percent")]
    cpu_pct: Option<f64>,
}

impl InfraCollector {
    pub fn new(cfg: &SourceConfig, client: Client) -> Self {
        Self {
            name: cfg.name.clone(),
            servers: cfg.servers.clone(),
            client,
        }
    }

    async fn probe(&self, url: &str) -> Value {
        let started = Instant::now();
        let resp = self.client.get(url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match resp {
            Ok(r) if r.status().is_success() => {
                // Metrics body is optional; reachability alone is useful.
                let body: StatusBody = r.json().await.unwrap_or_default();
                let mut m = Map::new();
                m.insert("up".into(), json!(true));
                m.insert("latency_ms".into(), json!(latency_ms));
                if let Some(v) = body.disk_used_pct {
                    m.insert("disk_used_pct".into(), json!(v));
                }
                if let Some(v) = body.mem_used_pct {
                    m.insert("mem_used_pct".into(), json!(v));
                }
                if let Some(v) = body.cpu_pct {
                    m.insert("cpu_pct".into(), json!(v));
                }
                Value::Object(m)
            }
            Ok(r) => json!({
                "up": false,
                "latency_ms": latency_ms,
                "error": format!("HTTP {}", r.status()),
            }),
            Err(e) => json!({
                "up": false,
                "latency_ms": latency_ms,
                "error": e.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl super::Collector for InfraCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Option<Value>> {
        if self.servers.is_empty() {
            return Ok(None);
        }
        let mut servers = Map::new();
        for (name, url) in &self.servers {
            servers.insert(name.clone(), self.probe(url).await);
        }
        Ok(Some(json!({ "servers": Value::Object(servers) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::Collector;

    fn cfg(servers: &[(&str, &str)]) -> SourceConfig {
        SourceConfig {
            name: "infra".into(),
            kind: "infra".into(),
            interval_minutes: 5,
            url: None,
            freshness_hours: 1.0,
            servers: servers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn no_servers_means_no_snapshot() {
        let c = InfraCollector::new(&cfg(&[]), Client::new());
        assert!(c.collect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_recorded_as_down() {
        // Reserved port on localhost; connection refused immediately.
        let c = InfraCollector::new(&cfg(&[("web-1", "http://127.0.0.1:9/status")]), Client::new());
        let v = c.collect().await.unwrap().unwrap();
        assert_eq!(v["servers"]["web-1"]["up"], json!(false));
        assert!(v["servers"]["web-1"]["error"].is_string());
    }
}
