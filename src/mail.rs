//! Outbound email port.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::auth::otp::OtpPurpose;

/// A one-time code on its way to the account owner.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OtpEmail {
    pub purpose: OtpPurpose,
    pub to: String,
    pub code: String,
}

impl OtpEmail {
    pub fn subject(&self) -> &'static str {
        match self.purpose {
            OtpPurpose::ConfirmEmail => "Confirm your email",
            OtpPurpose::ResetPassword => "Reset your password",
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OtpEmail) -> anyhow::Result<()>;
}

/// Writes codes to the log. Used when no relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OtpEmail) -> anyhow::Result<()> {
        info!(to = %email.to, purpose = ?email.purpose, code = %email.code, "otp email (log only)");
        Ok(())
    }
}

/// Posts emails to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct RelayMailer {
    client: reqwest::Client,
    url: String,
}

impl RelayMailer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, email: OtpEmail) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "to": email.to,
            "subject": email.subject(),
            "purpose": email.purpose,
            "text": format!("Your code is {}", email.code),
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("mail relay request")?;
        if !response.status().is_success() {
            bail!("mail relay returned status: {}", response.status());
        }
        Ok(())
    }
}

/// Hands the email to the mailer on a detached task. Failures are logged,
/// never returned.
pub fn notify(mailer: Arc<dyn Mailer>, email: OtpEmail) {
    tokio::spawn(async move {
        let to = email.to.clone();
        let purpose = email.purpose;
        if let Err(e) = mailer.send(email).await {
            error!(error = ?e, to = %to, purpose = ?purpose, "failed to deliver otp email");
        }
    });
}
