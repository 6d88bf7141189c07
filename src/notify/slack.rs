use anyhow::{Context, Result};
use reqwest::Client;

use super::{AlertLevel, Channel, ReportKind};
use crate::insight::Insight;

pub struct SlackChannel {
    webhook_url: String,
    client: Client,
}

impl SlackChannel {
    pub fn from_env() -> Option<Self> {
        std::env::var("SLACK_WEBHOOK_URL").ok().map(Self::new)
    }

    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
        }
    }

    async fn post_text(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({ "text": text });
        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send_insight(&self, insight: &Insight) -> Result<()> {
        let text = format!(
            "*{}* [{}]\n{}\n_{} · confidence {:.2}_",
            insight.title,
            insight.priority.as_str(),
            insight.message,
            insight.category,
            insight.confidence
        );
        self.post_text(&text).await
    }

    async fn send_alert(&self, message: &str, level: AlertLevel) -> Result<()> {
        self.post_text(&format!("*[{}]* {message}", level.as_str()))
            .await
    }

    async fn send_report(&self, text: &str, kind: ReportKind) -> Result<()> {
        self.post_text(&format!("*{} report*\n{text}", kind.as_str()))
            .await
    }
}
