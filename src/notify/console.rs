//! Console channel: prints to the process log. Always available, which
//! makes it the fallback primary channel and the workhorse for local runs.

use anyhow::Result;

use super::{AlertLevel, Channel, ReportKind};
use crate::insight::Insight;

pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send_insight(&self, insight: &Insight) -> Result<()> {
        tracing::info!(
            target: "vigil::notify",
            priority = insight.priority.as_str(),
            category = %insight.category,
            "{}: {}",
            insight.title,
            insight.message
        );
        Ok(())
    }

    async fn send_alert(&self, message: &str, level: AlertLevel) -> Result<()> {
        tracing::info!(target: "vigil::notify", level = level.as_str(), "{message}");
        Ok(())
    }

    async fn send_report(&self, text: &str, kind: ReportKind) -> Result<()> {
        tracing::info!(target: "vigil::notify", report = kind.as_str(), "\n{text}");
        Ok(())
    }
}
