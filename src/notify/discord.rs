use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{AlertLevel, Channel, ReportKind};
use crate::insight::Insight;

pub struct DiscordChannel {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordChannel {
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL").ok().map(Self::new)
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    async fn post(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send_insight(&self, insight: &Insight) -> Result<()> {
        let title = format!(
            "[{}] {}",
            insight.priority.as_str().to_ascii_uppercase(),
            insight.title
        );
        let description = format!(
            "{}\n**Category:** {}\n**Confidence:** {:.0}%\n**Time (UTC):** {}",
            insight.message,
            insight.category,
            insight.confidence * 100.0,
            insight.created_at.format("%Y-%m-%d %H:%M")
        );
        self.post(&DiscordWebhookPayload::embed(&title, &description))
            .await
    }

    async fn send_alert(&self, message: &str, level: AlertLevel) -> Result<()> {
        let title = format!("Alert ({})", level.as_str());
        self.post(&DiscordWebhookPayload::embed(&title, message))
            .await
    }

    async fn send_report(&self, text: &str, kind: ReportKind) -> Result<()> {
        // Discord embed descriptions cap at 4096 chars.
        let body: String = text.chars().take(4000).collect();
        let title = format!("{} report", capitalize(kind.as_str()));
        self.post(&DiscordWebhookPayload::embed(&title, &body)).await
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
        None => String::new(),
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
            }],
        }
    }
}
