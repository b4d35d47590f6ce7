pub mod templates;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::MailConfig;

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";

/// Outbound email capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;
}

/// Brevo transactional email over its HTTP API.
pub struct BrevoMailer {
    http: reqwest::Client,
    api_key: String,
    sender_email: String,
    sender_name: String,
}

impl BrevoMailer {
    pub fn new(api_key: String, sender_email: String, sender_name: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_key,
            sender_email,
            sender_name,
        })
    }
}

#[async_trait]
impl Mailer for BrevoMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let body = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": [{ "email": to }],
            "subject": subject,
            "htmlContent": html,
        });
        self.http
            .post(BREVO_SEND_URL)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("brevo request")?
            .error_for_status()
            .context("brevo response")?;
        Ok(())
    }
}

/// Development mailer: writes the envelope to the log instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        info!(%to, %subject, bytes = html.len(), "mail not sent (no provider configured)");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Box<dyn Mailer>> {
    match &cfg.brevo_api_key {
        Some(key) => Ok(Box::new(BrevoMailer::new(
            key.clone(),
            cfg.sender_email.clone(),
            cfg.sender_name.clone(),
        )?)),
        None => {
            warn!("BREVO_API_KEY not set; outgoing mail will only be logged");
            Ok(Box::new(LogMailer))
        }
    }
}

/// Sends a mail after the triggering change has committed. Delivery
/// failures are logged and dropped.
pub async fn send_best_effort(mailer: &dyn Mailer, to: &str, subject: &str, html: &str) -> bool {
    match mailer.send(to, subject, html).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = ?e, %to, %subject, "mail delivery failed");
            false
        }
    }
}
