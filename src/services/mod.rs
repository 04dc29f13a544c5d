// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod auth_flow;
pub mod email;
pub mod identity;
pub mod key_set;
pub mod magic_link;
pub mod mailer;
pub mod pkce;
pub mod retry;
pub mod session;
pub mod social;
pub mod token_verifier;

pub use auth_flow::{AuthFlowClient, AuthFlowRequest, IdTokenSource, UserInfo};
pub use identity::{AccountResolver, UserAccountPair};
pub use key_set::{HttpKeySetFetcher, KeySetCache, KeySetFetcher, StaticKeySetFetcher};
pub use magic_link::{MagicLinkDelivery, MagicLinkService, MagicLinkVerification};
pub use mailer::{LogMailer, Mailer, WebhookMailer};
pub use pkce::{PkceError, PkceStore};
pub use session::SessionService;
pub use social::{MappedProfile, SocialAuth, SocialProvider};
pub use token_verifier::{TokenError, TokenVerifier};

use crate::error::AppError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::future::Future;

/// `len` bytes from the system CSPRNG, base64url encoded without padding.
pub fn random_token(len: usize) -> Result<String, AppError> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("system random source failed")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Lowercase hex SHA-256, used to store secrets by digest only.
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Run a store write on its own task so it finishes even if the request
/// future that started it is dropped.
pub(crate) async fn complete_detached<F, T>(write: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(write)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("store write task failed: {e}")))?
}
