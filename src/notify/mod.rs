//! Delivery: pluggable channels plus the manager that routes insights,
//! records one `Delivery` row per attempted channel, and consumes budget.
//!
//! Channels are registered by name at startup; secrets come from the
//! environment, and a channel whose secrets are missing is disabled with a
//! log line rather than failing the boot.

pub mod console;
pub mod discord;
pub mod email;
pub mod slack;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::insight::{Delivery, Insight, Priority};
use crate::store::Store;

/// Severity tag for free-form alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Morning,
    Evening,
    Weekly,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Morning => "morning",
            ReportKind::Evening => "evening",
            ReportKind::Weekly => "weekly",
        }
    }
}

#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send_insight(&self, insight: &Insight) -> Result<()>;
    async fn send_alert(&self, message: &str, level: AlertLevel) -> Result<()>;
    async fn send_report(&self, text: &str, kind: ReportKind) -> Result<()>;
}

/// Build channels from config enablement + environment secrets.
pub fn build_channels(cfg: &Config) -> Vec<Box<dyn Channel>> {
    let mut out: Vec<Box<dyn Channel>> = Vec::new();
    for (name, ch) in &cfg.channels {
        if !ch.enabled {
            continue;
        }
        match name.as_str() {
            "console" => out.push(Box::new(console::ConsoleChannel::new())),
            "discord" => match discord::DiscordChannel::from_env() {
                Some(c) => out.push(Box::new(c)),
                None => tracing::warn!("discord enabled but DISCORD_WEBHOOK_URL missing"),
            },
            "slack" => match slack::SlackChannel::from_env() {
                Some(c) => out.push(Box::new(c)),
                None => tracing::warn!("slack enabled but SLACK_WEBHOOK_URL missing"),
            },
            "email" => match email::EmailChannel::from_env() {
                Ok(c) => out.push(Box::new(c)),
                Err(e) => tracing::warn!(error = ?e, "email enabled but not configured"),
            },
            other => tracing::warn!(channel = other, "unknown channel in config; skipped"),
        }
    }
    out
}

/// Executes dispositions: immediate sends, report broadcast, budget bumps.
pub struct DeliveryManager {
    channels: Vec<Box<dyn Channel>>,
    routes: HashMap<Priority, Vec<String>>,
    store: Store,
    max_per_day: u32,
}

/// Result of one immediate delivery attempt across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

impl DeliveryOutcome {
    pub fn ok(&self) -> bool {
        self.succeeded > 0
    }
}

impl DeliveryManager {
    pub fn new(channels: Vec<Box<dyn Channel>>, cfg: &Config, store: Store) -> Self {
        Self {
            channels,
            routes: parse_routes(&cfg.routes),
            store,
            max_per_day: cfg.decision.max_per_day,
        }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn routed_channels(&self, priority: Priority) -> Vec<&dyn Channel> {
        match self.routes.get(&priority) {
            // Preserve route order; unknown names are ignored (validated at
            // config load, but a channel may have been env-disabled).
            Some(names) => names
                .iter()
                .filter_map(|n| self.channels.iter().find(|c| c.name() == n).map(|b| b.as_ref()))
                .collect(),
            None => self.channels.iter().map(|b| b.as_ref()).collect(),
        }
    }

    /// Send `insight` (already persisted; `id` set) through its routed
    /// channels. One Delivery row per attempt; success means at least one
    /// channel accepted it, and then the insight is marked delivered and
    /// the day's budget is bumped.
    pub async fn deliver_now(&self, insight: &Insight, budget_date: NaiveDate) -> DeliveryOutcome {
        let id = match insight.id {
            Some(id) => id,
            None => {
                tracing::warn!(title = %insight.title, "deliver_now on unsaved insight");
                return DeliveryOutcome { attempted: 0, succeeded: 0 };
            }
        };

        let targets = self.routed_channels(insight.priority);
        let mut outcome = DeliveryOutcome { attempted: 0, succeeded: 0 };
        for ch in targets {
            outcome.attempted += 1;
            let result = ch.send_insight(insight).await;
            let success = result.is_ok();
            if success {
                outcome.succeeded += 1;
            } else {
                tracing::warn!(channel = ch.name(), error = ?result, "channel send failed");
            }
            let row = Delivery {
                id: None,
                insight_id: id,
                channel: ch.name().to_string(),
                delivered_at: Utc::now(),
                success,
                error: result.err().map(|e| format!("{e:#}")),
            };
            if let Err(e) = self.store.save_delivery(&row) {
                tracing::warn!(error = ?e, "delivery record not persisted");
            }
        }

        if outcome.ok() {
            counter!("vigil_deliveries_total").increment(1);
            if let Err(e) = self.store.mark_delivered(id) {
                tracing::warn!(error = ?e, "mark_delivered failed");
            }
            if let Err(e) = self.store.increment_budget(budget_date, id, self.max_per_day) {
                tracing::warn!(error = ?e, "budget increment failed");
            }
        } else {
            counter!("vigil_delivery_failures_total").increment(1);
        }
        outcome
    }

    /// Broadcast a report to every channel. Reports never consume budget.
    pub async fn send_report(&self, text: &str, kind: ReportKind) -> bool {
        let mut any = false;
        for ch in &self.channels {
            match ch.send_report(text, kind).await {
                Ok(()) => any = true,
                Err(e) => {
                    tracing::warn!(channel = ch.name(), error = ?e, "report send failed")
                }
            }
        }
        any
    }

    /// Broadcast a free-form alert (engine-level conditions, not insights).
    pub async fn broadcast_alert(&self, message: &str, level: AlertLevel) {
        for ch in &self.channels {
            if let Err(e) = ch.send_alert(message, level).await {
                tracing::warn!(channel = ch.name(), error = ?e, "alert send failed");
            }
        }
    }
}

fn parse_routes(raw: &BTreeMap<String, Vec<String>>) -> HashMap<Priority, Vec<String>> {
    raw.iter()
        .filter_map(|(k, v)| Priority::from_str(k).map(|p| (p, v.clone())))
        .collect()
}
