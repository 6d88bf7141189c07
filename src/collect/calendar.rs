//! Calendar collector. Pulls today's agenda as JSON events and normalizes
//! them to `{events: [{title, start, end, location}]}`.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::require_url;
use crate::config::SourceConfig;

pub struct CalendarCollector {
    name: String,
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct UpstreamEvent {
    #[serde(alias = "summary")]
    title: String,
    start: String,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

impl CalendarCollector {
    pub fn new(cfg: &SourceConfig, client: Client) -> Result<Self> {
        Ok(Self {
            name: cfg.name.clone(),
            url: require_url(cfg)?,
            client,
        })
    }

    fn normalize(events: Vec<UpstreamEvent>) -> Value {
        let events: Vec<Value> = events
            .into_iter()
            .filter(|e| !e.title.trim().is_empty())
            .map(|e| {
                json!({
                    "title": e.title.trim(),
                    "start": e.start,
                    "end": e.end,
                    "location": e.location,
                })
            })
            .collect();
        json!({ "events": events })
    }
}

#[async_trait::async_trait]
impl super::Collector for CalendarCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Option<Value>> {
        let events: Vec<UpstreamEvent> = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("calendar fetch")?
            .error_for_status()
            .context("calendar non-2xx")?
            .json()
            .await
            .context("calendar parse")?;
        // An empty agenda is still a valid observation; record it so the
        // morning digest can say "no meetings" instead of going stale.
        Ok(Some(Self::normalize(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_titled_events_only() {
        let raw: Vec<UpstreamEvent> = serde_json::from_str(
            r#"[
                {"summary": "Standup", "start": "2025-09-06T09:00:00Z", "end": "2025-09-06T09:15:00Z"},
                {"title": "  ", "start": "2025-09-06T10:00:00Z"}
            ]"#,
        )
        .unwrap();
        let v = CalendarCollector::normalize(raw);
        let events = v["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["title"], json!("Standup"));
    }
}
