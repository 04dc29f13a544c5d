// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer token verification against the issuer's key set.

use super::key_set::{KeySetCache, KeySetError, VerificationKey};
use crate::config::JwtConfig;
use crate::error::AppError;
use crate::models::payload::deserialize_roles;
use crate::models::{Payload, Role};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The exact check a token failed. Logged, never sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token header: {0}")]
    MalformedHeader(String),
    #[error("algorithm mismatch: expected {expected:?}, got {found:?}")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Algorithm,
    },
    #[error("token header has no kid")]
    MissingKid,
    #[error("no key with kid {0} in key set")]
    UnknownKey(String),
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(#[from] KeySetError),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("issuer mismatch: {0:?}")]
    IssuerMismatch(Option<String>),
    #[error("token expired at {0}")]
    Expired(i64),
    #[error("missing or invalid exp claim")]
    MissingExpiry,
    #[error("invalid claims: {0}")]
    InvalidClaims(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeySetUnavailable(e) => AppError::Upstream(e.to_string()),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

/// Claims carried by platform bearer tokens.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenClaims {
    user_id: String,
    project_id: String,
    user_email: String,
    user_full_name: String,
    #[serde(default)]
    user_avatar: Option<String>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    roles: BTreeSet<Role>,
    project_title: String,
    iss: String,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
}

/// Verifies tokens and maps their claims into a [`Payload`].
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    issuer: String,
    algorithm: Algorithm,
    clock_tolerance_secs: i64,
    key_cache_ttl: std::time::Duration,
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig, keys: Arc<KeySetCache>) -> Self {
        tracing::info!(
            issuer = %config.issuer,
            algorithm = ?config.algorithm,
            "Initialized bearer token verifier"
        );

        Self {
            keys,
            issuer: config.issuer.clone(),
            algorithm: config.algorithm,
            clock_tolerance_secs: config.clock_tolerance.as_secs() as i64,
            key_cache_ttl: config.key_cache_ttl,
        }
    }

    /// Lenient variant of [`verify`](Self::verify): any failure is `None`.
    pub async fn parse(&self, token: &str) -> Option<Payload> {
        match self.verify(token).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::debug!(error = %e, "Token rejected");
                None
            }
        }
    }

    /// Verify header algorithm, signature, issuer and expiry, in that order.
    pub async fn verify(&self, token: &str) -> Result<Payload, TokenError> {
        let header =
            decode_header(token).map_err(|e| TokenError::MalformedHeader(e.to_string()))?;

        if header.alg != self.algorithm {
            return Err(TokenError::AlgorithmMismatch {
                expected: self.algorithm,
                found: header.alg,
            });
        }

        let kid = header.kid.ok_or(TokenError::MissingKid)?;
        let key = self.key_for_kid(&kid).await?;

        if let Some(found) = key.algorithm.filter(|alg| *alg != self.algorithm) {
            return Err(TokenError::AlgorithmMismatch {
                expected: self.algorithm,
                found,
            });
        }

        // Signature only; issuer and expiry are checked below so the order of
        // checks stays fixed.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let claims = decode::<Map<String, Value>>(token, &key.decoding_key, &validation)
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?
            .claims;

        let issuer = claims.get("iss").and_then(Value::as_str);
        if issuer != Some(self.issuer.as_str()) {
            return Err(TokenError::IssuerMismatch(issuer.map(str::to_string)));
        }

        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(TokenError::MissingExpiry)?;
        if Utc::now().timestamp() > exp.saturating_add(self.clock_tolerance_secs) {
            return Err(TokenError::Expired(exp));
        }

        let claims: TokenClaims = serde_json::from_value(Value::Object(claims))
            .map_err(|e| TokenError::InvalidClaims(e.to_string()))?;

        into_payload(claims)
    }

    async fn key_for_kid(&self, kid: &str) -> Result<Arc<VerificationKey>, TokenError> {
        let set = self.keys.get(self.key_cache_ttl).await?;
        if let Some(key) = set.get(kid) {
            return Ok(key);
        }

        tracing::info!(kid = %kid, "Unknown kid, refreshing key set");
        let set = self.keys.refresh(self.key_cache_ttl).await?;
        set.get(kid)
            .ok_or_else(|| TokenError::UnknownKey(kid.to_string()))
    }
}

fn into_payload(claims: TokenClaims) -> Result<Payload, TokenError> {
    let expires_at = timestamp(claims.exp)?;
    let issued_at = claims.iat.map(timestamp).transpose()?;

    Ok(Payload {
        user_id: claims.user_id,
        project_id: claims.project_id,
        email: claims.user_email.trim().to_lowercase(),
        full_name: claims.user_full_name,
        avatar: claims.user_avatar.filter(|a| !a.is_empty()),
        roles: claims.roles,
        project_title: claims.project_title,
        issued_at,
        expires_at,
        issuer: claims.iss,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TokenError::InvalidClaims(format!("timestamp out of range: {secs}")))
}
