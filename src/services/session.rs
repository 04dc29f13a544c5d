// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reference-token sessions behind the session cookie.

use super::{complete_detached, random_token, sha256_hex};
use crate::db::AuthStore;
use crate::error::AppError;
use crate::models::{Session, User};
use crate::time_utils::{expires_in, now_utc};
use std::sync::Arc;
use std::time::Duration;

pub struct SessionService {
    store: Arc<dyn AuthStore>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn AuthStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session and return the raw reference token for the cookie.
    /// Only its digest is stored.
    pub async fn create(&self, user_id: &str) -> Result<String, AppError> {
        let token = random_token(32)?;
        let now = now_utc();
        let session = Session {
            token_hash: sha256_hex(&token),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: expires_in(now, self.ttl),
        };

        let store = self.store.clone();
        complete_detached(async move { store.create_session(&session).await }).await?;

        tracing::debug!(user_id = %user_id, "Session created");
        Ok(token)
    }

    /// User behind an unexpired session token.
    pub async fn resolve(&self, token: &str) -> Result<Option<User>, AppError> {
        let Some(session) = self.store.get_session(&sha256_hex(token)).await? else {
            return Ok(None);
        };

        self.store.get_user_by_id(&session.user_id).await
    }

    pub async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let token_hash = sha256_hex(token);
        let store = self.store.clone();
        complete_detached(async move { store.delete_session(&token_hash).await }).await
    }

    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        self.store.cleanup_expired_sessions().await
    }
}
