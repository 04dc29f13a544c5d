// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! PKCE state/verifier store backing the OAuth authorization-code flow.

use super::{complete_detached, random_token};
use crate::db::AuthStore;
use crate::error::AppError;
use crate::models::AuthStateLookup;
use crate::time_utils::{expires_in, now_utc};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Redemption failures, kept distinct so the UI can offer a retry on expiry.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    #[error("auth state not found")]
    NotFound,
    #[error("auth state expired")]
    Expired,
    #[error("auth state already consumed")]
    AlreadyConsumed,
    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<PkceError> for AppError {
    fn from(err: PkceError) -> Self {
        match err {
            PkceError::Store(e) => e,
            other @ PkceError::Expired => AppError::StateExpired(other.to_string()),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

/// A freshly started authorization: `state` and `code_challenge` go to the
/// provider, the verifier stays server side.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub expires_at: DateTime<Utc>,
}

/// 32 random bytes, base64url encoded (43 characters).
pub fn generate_code_verifier() -> Result<String, AppError> {
    random_token(32)
}

/// `S256` code challenge for a verifier.
pub fn code_challenge_s256(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

pub struct PkceStore {
    store: Arc<dyn AuthStore>,
    ttl: Duration,
}

impl PkceStore {
    pub fn new(store: Arc<dyn AuthStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn save(
        &self,
        state: &str,
        code_verifier: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.store
            .save_auth_state(state, code_verifier, expires_at)
            .await
    }

    /// Look up without consuming.
    pub async fn get(&self, state: &str) -> Result<AuthStateLookup, AppError> {
        self.store.get_auth_state(state).await
    }

    pub async fn delete(&self, state: &str) -> Result<bool, AppError> {
        self.store.delete_auth_state(state).await
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.store.purge_expired_auth_states().await
    }

    /// Generate and persist a new state/verifier pair.
    pub async fn begin(&self) -> Result<PkceChallenge, AppError> {
        let state = random_token(32)?;
        let code_verifier = generate_code_verifier()?;
        let expires_at = expires_in(now_utc(), self.ttl);

        self.save(&state, &code_verifier, expires_at).await?;

        Ok(PkceChallenge {
            code_challenge: code_challenge_s256(&code_verifier),
            state,
            code_verifier,
            expires_at,
        })
    }

    /// Redeem `state` exactly once and return its verifier.
    ///
    /// Of several concurrent redemptions only the one whose delete removed
    /// the row succeeds.
    pub async fn consume(&self, state: &str) -> Result<String, PkceError> {
        match self.get(state).await? {
            AuthStateLookup::NotFound => Err(PkceError::NotFound),
            AuthStateLookup::Expired => {
                let store = self.store.clone();
                let owned = state.to_string();
                complete_detached(async move { store.delete_auth_state(&owned).await }).await?;
                Err(PkceError::Expired)
            }
            AuthStateLookup::Code(code_verifier) => {
                let store = self.store.clone();
                let owned = state.to_string();
                let deleted =
                    complete_detached(async move { store.delete_auth_state(&owned).await })
                        .await?;

                if deleted {
                    Ok(code_verifier)
                } else {
                    Err(PkceError::AlreadyConsumed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_is_43_url_safe_chars() {
        let verifier = generate_code_verifier().unwrap();
        assert_eq!(verifier.len(), 43);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(verifier, generate_code_verifier().unwrap());
    }
}
