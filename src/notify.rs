//! Code delivery.
//!
//! A `Notifier` takes `{recipient, subject, text}` and reports which
//! recipients were rejected. A transport error or a non-empty rejection list
//! means the code did not reach anyone and the caller fails with
//! `DeliveryFailure`.
//!
//! `LogNotifier` is the development default and only logs the message.
//! `WebhookNotifier` POSTs the message as JSON to a relay that owns the real
//! mail or SMS integration.

use crate::{auth::AuthError, APP_USER_AGENT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Mutex, time::Duration};
use tracing::{info, instrument};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmailInput {
    pub recipient: String,
    pub subject: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryReport {
    #[serde(default)]
    pub rejected: Vec<String>,
}

/// Why a code is being sent. Only affects the message wording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpPurpose {
    Signup,
    Login,
    PasswordReset,
    Resend,
}

impl OtpPurpose {
    fn subject(self) -> &'static str {
        match self {
            Self::Signup => "Poll agent signup code",
            Self::Login => "Poll agent login code",
            Self::PasswordReset => "Poll agent password reset code",
            Self::Resend => "Poll agent verification code",
        }
    }
}

/// Build the message for a code.
///
/// `relay_for` names the subagent when the message goes to a supervisor who
/// passes the code on.
#[must_use]
pub fn otp_message(
    recipient: &str,
    code: &str,
    purpose: OtpPurpose,
    relay_for: Option<&str>,
) -> EmailInput {
    let text = match relay_for {
        Some(agent) => format!("Verification code for your agent {agent}: {code}"),
        None => format!("Your verification code is {code}"),
    };
    EmailInput {
        recipient: recipient.to_string(),
        subject: purpose.subject().to_string(),
        text,
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailInput) -> Result<DeliveryReport>;
}

/// Send and collapse every failure mode into `DeliveryFailure`.
///
/// # Errors
/// Returns `DeliveryFailure` if the transport fails or any recipient is rejected.
#[instrument(skip(notifier, message), fields(subject = %message.subject))]
pub async fn deliver(notifier: &dyn Notifier, message: &EmailInput) -> Result<(), AuthError> {
    let report = notifier
        .send(message)
        .await
        .map_err(|err| AuthError::DeliveryFailure(format!("{err:#}")))?;
    if report.rejected.is_empty() {
        Ok(())
    } else {
        Err(AuthError::DeliveryFailure(format!(
            "rejected recipients: {}",
            report.rejected.join(", ")
        )))
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailInput) -> Result<DeliveryReport> {
        info!(
            recipient = %message.recipient,
            subject = %message.subject,
            text = %message.text,
            "notification send stub"
        );
        Ok(DeliveryReport::default())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a EmailInput,
}

#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    sender: String,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, sender: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build notification HTTP client")?;
        Ok(Self {
            client,
            url,
            sender: sender.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &EmailInput) -> Result<DeliveryReport> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&WebhookPayload {
                from: &self.sender,
                message,
            })
            .send()
            .await
            .context("notification request failed")?
            .error_for_status()
            .context("notification relay returned an error")?;

        let body = response
            .bytes()
            .await
            .context("failed to read notification response")?;
        if body.is_empty() {
            return Ok(DeliveryReport::default());
        }
        serde_json::from_slice(&body).context("invalid notification response")
    }
}

/// Notifier that keeps every message in memory. Used by tests to read codes
/// back out, and to simulate rejected deliveries.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<EmailInput>>,
    reject: Mutex<bool>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following message.
    pub fn set_rejecting(&self, reject: bool) {
        match self.reject.lock() {
            Ok(mut flag) => *flag = reject,
            Err(poisoned) => *poisoned.into_inner() = reject,
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<EmailInput> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Last message addressed to `recipient`.
    #[must_use]
    pub fn last_to(&self, recipient: &str) -> Option<EmailInput> {
        self.sent()
            .into_iter()
            .rev()
            .find(|message| message.recipient == recipient)
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, message: &EmailInput) -> Result<DeliveryReport> {
        let reject = match self.reject.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if reject {
            return Ok(DeliveryReport {
                rejected: vec![message.recipient.clone()],
            });
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(DeliveryReport::default())
    }
}
