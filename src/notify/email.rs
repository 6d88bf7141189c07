use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{AlertLevel, Channel, ReportKind};
use crate::insight::Insight;

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailChannel {
    /// SMTP_HOST / SMTP_USER / SMTP_PASS / NOTIFY_EMAIL_FROM / NOTIFY_EMAIL_TO.
    /// Missing or invalid settings disable the channel rather than panic.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST missing")?;
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("NOTIFY_EMAIL_FROM").context("NOTIFY_EMAIL_FROM missing")?;
        let to_addr = std::env::var("NOTIFY_EMAIL_TO").context("NOTIFY_EMAIL_TO missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from: Mailbox = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to: Mailbox = to_addr.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Self { mailer, from, to })
    }

    async fn send_plain(&self, subject: String, body: String) -> Result<()> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send_insight(&self, insight: &Insight) -> Result<()> {
        let subject = format!(
            "[vigil/{}] {}",
            insight.priority.as_str(),
            insight.title
        );
        let body = format!(
            "{}\n\nCategory: {}\nConfidence: {:.2}\nAnalyzer: {}\nTime: {}\n",
            insight.message,
            insight.category,
            insight.confidence,
            insight.source_analyzer,
            insight.created_at.to_rfc3339()
        );
        self.send_plain(subject, body).await
    }

    async fn send_alert(&self, message: &str, level: AlertLevel) -> Result<()> {
        self.send_plain(format!("[vigil] alert ({})", level.as_str()), message.to_string())
            .await
    }

    async fn send_report(&self, text: &str, kind: ReportKind) -> Result<()> {
        self.send_plain(format!("[vigil] {} report", kind.as_str()), text.to_string())
            .await
    }
}
