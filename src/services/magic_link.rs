// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-use, time-boxed email sign-in tokens.

use super::mailer::{EmailMessage, Mailer};
use super::{complete_detached, random_token, sha256_hex};
use crate::db::AuthStore;
use crate::error::AppError;
use crate::models::{MagicLink, MagicLinkIntent, CREDENTIAL_PROVIDER_ID};
use crate::redact::redact_url;
use crate::time_utils::{expires_in, format_utc_rfc3339, now_utc};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Longest token accepted for lookup; real tokens are 43 characters.
const MAX_TOKEN_LEN: usize = 128;

/// A newly issued link. `token` is the only copy of the raw secret.
#[derive(Debug, Clone)]
pub struct IssuedMagicLink {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a send request. Both variants produce the same HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub enum MagicLinkDelivery {
    Sent { expires_at: DateTime<Utc> },
    /// Nothing was sent (reset requested for an unknown account).
    Suppressed,
}

/// Outcome of [`MagicLinkService::verify`]. Unknown, used and expired tokens
/// all yield the same `invalid` value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagicLinkVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip)]
    pub intent: Option<MagicLinkIntent>,
}

impl MagicLinkVerification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            email: None,
            intent: None,
        }
    }
}

pub struct MagicLinkService {
    store: Arc<dyn AuthStore>,
    mailer: Arc<dyn Mailer>,
    base_url: String,
    ttl: Duration,
    resend_cooldown: Duration,
}

impl MagicLinkService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        mailer: Arc<dyn Mailer>,
        base_url: &str,
        ttl: Duration,
        resend_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            resend_cooldown,
        }
    }

    /// Create and store a link for `email`, superseding any active one.
    ///
    /// `intent` is recorded for the email template only; tokens are
    /// generated the same way for every intent.
    pub async fn issue(
        &self,
        email: &str,
        intent: MagicLinkIntent,
    ) -> Result<IssuedMagicLink, AppError> {
        let token = random_token(32)?;
        let created_at = now_utc();
        let expires_at = expires_in(created_at, self.ttl);

        let link = MagicLink {
            token_hash: sha256_hex(&token),
            email: email.trim().to_lowercase(),
            intent: intent.as_str().to_string(),
            created_at,
            expires_at,
            used: false,
            used_at: None,
        };

        let store = self.store.clone();
        complete_detached(async move { store.insert_magic_link(&link).await }).await?;

        Ok(IssuedMagicLink { token, expires_at })
    }

    /// Apply the send policy, issue a link and email it.
    pub async fn request(
        &self,
        email: &str,
        intent: MagicLinkIntent,
    ) -> Result<MagicLinkDelivery, AppError> {
        if let Some(active) = self.store.find_active_magic_link(email).await? {
            let wait = self.cooldown_remaining(&active, now_utc());
            if wait > 0 {
                tracing::info!(wait_seconds = wait, "Magic link requested during cooldown");
                return Err(AppError::RateLimited { wait_seconds: wait });
            }
        }

        if intent == MagicLinkIntent::Reset && !self.has_credential_account(email).await? {
            tracing::info!("Reset requested for an email without a credential account");
            return Ok(MagicLinkDelivery::Suppressed);
        }

        let issued = self.issue(email, intent).await?;
        let link = self.link_url(&issued.token);
        tracing::debug!(
            link = %redact_url(&link),
            intent = intent.as_str(),
            expires_at = %format_utc_rfc3339(issued.expires_at),
            "Magic link issued"
        );

        if let Err(e) = self
            .mailer
            .send(&EmailMessage::magic_link(email, intent, &link))
            .await
        {
            // An unsent link must not hold the cooldown
            let token_hash = sha256_hex(&issued.token);
            if let Err(retire) = self.store.consume_magic_link(&token_hash, now_utc()).await {
                tracing::warn!(error = %retire, "Failed to retire unsent magic link");
            }
            return Err(e);
        }

        Ok(MagicLinkDelivery::Sent {
            expires_at: issued.expires_at,
        })
    }

    /// Redeem a token. Succeeds at most once per token.
    ///
    /// The store write runs to completion even if the caller goes away, so a
    /// token cannot be left half-consumed.
    pub async fn verify(&self, token: &str) -> Result<MagicLinkVerification, AppError> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Ok(MagicLinkVerification::invalid());
        }

        let token_hash = sha256_hex(token);
        let store = self.store.clone();
        let consumed =
            complete_detached(async move { store.consume_magic_link(&token_hash, now_utc()).await })
                .await?;

        Ok(match consumed {
            Some(link) => MagicLinkVerification {
                valid: true,
                intent: MagicLinkIntent::parse(&link.intent),
                email: Some(link.email),
            },
            None => {
                tracing::info!("Magic link rejected");
                MagicLinkVerification::invalid()
            }
        })
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.store.purge_expired_magic_links().await
    }

    pub fn link_url(&self, token: &str) -> String {
        format!(
            "{}/auth/magic-link/verify?token={}",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    /// Seconds left before another link may be sent, rounded up.
    fn cooldown_remaining(&self, active: &MagicLink, now: DateTime<Utc>) -> u64 {
        let cooldown = chrono::Duration::from_std(self.resend_cooldown).unwrap_or_default();
        let remaining = (active.created_at + cooldown) - now;
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }

    async fn has_credential_account(&self, email: &str) -> Result<bool, AppError> {
        let Some(user) = self.store.get_user_by_email(email).await? else {
            return Ok(false);
        };

        Ok(self
            .store
            .get_accounts_by_user_id(&user.id)
            .await?
            .iter()
            .any(|account| account.provider_id == CREDENTIAL_PROVIDER_ID))
    }
}
