use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

// ── Data types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Outbound mail collaborator. Transport details live behind this trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

// ── RelayMailer ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    #[serde(flatten)]
    mail: &'a OutgoingMail,
}

/// Delivers mail by POSTing JSON to an HTTP relay, signed with HMAC-SHA256
/// when a relay secret is configured.
#[derive(Clone)]
pub struct RelayMailer {
    client: reqwest::Client,
    url: String,
    from: String,
    signing_secret: Option<String>,
}

impl RelayMailer {
    pub fn new(url: String, from: String, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build mail relay client")?;

        Ok(Self {
            client,
            url,
            from,
            signing_secret,
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let body = serde_json::to_string(&RelayPayload {
            from: &self.from,
            mail,
        })
        .context("serialize mail")?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(ref secret) = self.signing_secret {
            let signature = compute_signature(secret, &body)?;
            request = request.header("X-Plaint-Signature", format!("sha256={signature}"));
        }

        let resp = request
            .body(body)
            .send()
            .await
            .context("mail relay request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("mail relay returned {status}");
        }
        debug!(to = %mail.to, %status, "mail delivered to relay");
        Ok(())
    }
}

// ── LogMailer ────────────────────────────────────────────────────────────────

/// Fallback when no relay is configured: the message, approval link
/// included, goes to the server log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.text, "mail (no relay configured)");
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Compute HMAC-SHA256 hex digest.
pub fn compute_signature(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("hmac key: {e}"))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
