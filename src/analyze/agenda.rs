//! Morning agenda analyzer (scheduled class). Turns the latest calendar
//! snapshot into a Low-priority digest insight. An external summarizer
//! service can rewrite the text; it is a black box that returns text or
//! fails, and on failure the plain formatting is used as-is.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde_json::{json, Value};
use std::time::Duration;

use super::{was_delivered_recently, Analyzer, AnalyzerContext, Schedule};
use crate::config::Config;
use crate::insight::{Insight, Priority};

const DEDUPE_WINDOW_HOURS: f64 = 20.0;

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// HTTP summarizer: POST `{"text": ...}` → `{"summary": ...}`.
pub struct HttpSummarizer {
    url: String,
    client: reqwest::Client,
}

impl HttpSummarizer {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .map_err(anyhow::Error::from)?,
        })
    }
}

#[async_trait::async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let resp: Value = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("summarizer post")?
            .error_for_status()
            .context("summarizer non-2xx")?
            .json()
            .await
            .context("summarizer parse")?;
        resp.get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("summarizer returned no text"))
    }
}

pub struct MorningAgendaAnalyzer {
    at: chrono::NaiveTime,
    tz: FixedOffset,
    summarizer: Option<Box<dyn Summarizer>>,
    enabled: bool,
}

impl MorningAgendaAnalyzer {
    pub fn from_config(cfg: &Config, tz: FixedOffset) -> Self {
        let a = cfg.analyzer("agenda");
        let at = a
            .at
            .as_deref()
            .and_then(|s| chrono::NaiveTime::parse_from_str(s, "%H:%M").ok())
            .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(7, 0, 0).expect("static time"));
        let summarizer: Option<Box<dyn Summarizer>> = match &cfg.summarizer.url {
            Some(url) => HttpSummarizer::new(url.clone(), cfg.summarizer.timeout_secs.unwrap_or(15))
                .map(|s| Box::new(s) as Box<dyn Summarizer>)
                .ok(),
            None => None,
        };
        Self {
            at,
            tz,
            summarizer,
            enabled: a.enabled,
        }
    }

    #[cfg(test)]
    pub fn for_tests(summarizer: Option<Box<dyn Summarizer>>) -> Self {
        Self {
            at: chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            tz: FixedOffset::east_opt(0).unwrap(),
            summarizer,
            enabled: true,
        }
    }
}

/// Plain-text agenda from a calendar payload. Empty agenda is still text.
pub fn format_agenda(payload: &Value) -> String {
    let events = payload
        .get("events")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if events.is_empty() {
        return "No meetings on the calendar today.".to_string();
    }
    let mut lines = vec![format!("{} meeting(s) today:", events.len())];
    for e in &events {
        let title = e.get("title").and_then(|v| v.as_str()).unwrap_or("(untitled)");
        let start = e.get("start").and_then(|v| v.as_str()).unwrap_or("?");
        match e.get("location").and_then(|v| v.as_str()) {
            Some(loc) if !loc.is_empty() => lines.push(format!("- {start} {title} @ {loc}")),
            _ => lines.push(format!("- {start} {title}")),
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl Analyzer for MorningAgendaAnalyzer {
    fn name(&self) -> &str {
        "agenda"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Scheduled { at: self.at }
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn analyze(&self, cx: &AnalyzerContext<'_>) -> Result<Vec<Insight>> {
        let payload = match cx.fresh.get("calendar") {
            Some(p) => p.clone(),
            None => match cx.store.latest_snapshot("calendar")? {
                Some(s) => s.payload,
                None => return Ok(Vec::new()),
            },
        };

        let date = cx.now.with_timezone(&self.tz).date_naive();
        let key = format!("agenda:{date}");
        if was_delivered_recently(cx.store, &key, DEDUPE_WINDOW_HOURS) {
            return Ok(Vec::new());
        }

        let plain = format_agenda(&payload);
        let message = match &self.summarizer {
            Some(s) => match s.summarize(&plain).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = ?e, "summarizer failed; using plain agenda");
                    plain.clone()
                }
            },
            None => plain.clone(),
        };

        Ok(vec![Insight::new(
            "digest",
            "calendar",
            Priority::Low,
            "Today's agenda",
            message,
        )
        .with_data(json!({ "date": date.to_string(), "plain": plain }))
        .with_dedupe_key(key)
        .expires_in_hours(16)])
    }
}
