// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound email delivery for magic links.

use super::retry::{with_retry_if, RetryConfig};
use crate::error::AppError;
use crate::models::MagicLinkIntent;
use crate::redact::redact_url;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    /// Render the template for `intent` around `link`.
    pub fn magic_link(to: &str, intent: MagicLinkIntent, link: &str) -> Self {
        let (subject, heading, action) = match intent {
            MagicLinkIntent::Signup => (
                "Confirm your email",
                "Welcome!",
                "Click the button below to confirm your email and finish signing up.",
            ),
            MagicLinkIntent::Reset => (
                "Reset your password",
                "Password reset",
                "Click the button below to choose a new password.",
            ),
        };

        let html = format!(
            "<h1>{heading}</h1>\
             <p>{action}</p>\
             <p><a href=\"{link}\">Continue</a></p>\
             <p>If you did not request this email you can ignore it.</p>"
        );

        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            html,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError>;
}

/// Logs the recipient and subject instead of sending. The body, which
/// carries the link, is never logged.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery not configured; message logged only"
        );
        Ok(())
    }
}

/// POSTs `{to, subject, html}` to a webhook.
pub struct WebhookMailer {
    http_client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

#[derive(Debug, thiserror::Error)]
enum WebhookError {
    #[error("mail webhook request failed: {0}")]
    Transient(String),
    #[error("mail webhook rejected message: {0}")]
    Rejected(String),
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
            retry: RetryConfig::default(),
        })
    }

    async fn post(&self, message: &EmailMessage) -> Result<(), WebhookError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| WebhookError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(WebhookError::Transient(format!("status {status}")))
        } else {
            Err(WebhookError::Rejected(format!("status {status}")))
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        with_retry_if(
            &self.retry,
            |e| matches!(e, WebhookError::Transient(_)),
            || self.post(message),
        )
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

        tracing::info!(
            to = %message.to,
            webhook = %redact_url(&self.url),
            "Email handed to mail webhook"
        );
        Ok(())
    }
}

/// Keeps every message in memory, for tests.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_differ_per_intent() {
        let signup = EmailMessage::magic_link("a@b.com", MagicLinkIntent::Signup, "https://x/1");
        let reset = EmailMessage::magic_link("a@b.com", MagicLinkIntent::Reset, "https://x/1");

        assert_ne!(signup.subject, reset.subject);
        assert!(signup.html.contains("https://x/1"));
        assert!(reset.html.contains("https://x/1"));
    }
}
