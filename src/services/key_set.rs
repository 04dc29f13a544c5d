// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cache for the issuer's published verification key set (JWKS).
//!
//! The cache holds one immutable [`KeySet`] snapshot. Staleness is decided by
//! the caller's `max_age`; concurrent refreshes are serialized so a cold
//! cache triggers a single fetch that every waiter shares.

use super::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Key-set fetch failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeySetError {
    /// Network failure or 5xx; worth retrying.
    #[error("key set fetch failed: {0}")]
    Transient(String),
    /// The endpoint answered but the document is unusable.
    #[error("invalid key set: {0}")]
    Invalid(String),
}

impl KeySetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KeySetError::Transient(_))
    }
}

/// One entry of a JWKS document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// A usable public key resolved from a [`Jwk`].
pub struct VerificationKey {
    pub kid: String,
    /// Algorithm pinned by the key set, if any
    pub algorithm: Option<Algorithm>,
    pub decoding_key: DecodingKey,
}

/// Immutable snapshot of the key set, keyed by `kid`.
pub struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    fetched_at: Instant,
}

impl KeySet {
    /// Build a snapshot from a JWKS document, skipping keys that cannot be
    /// used for RSA signature verification.
    pub fn from_jwks(jwks: Jwks) -> Result<Self, KeySetError> {
        let mut keys = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" || jwk.kid.trim().is_empty() {
                continue;
            }

            if jwk.use_.as_deref().is_some_and(|u| u != "sig") {
                continue;
            }

            let algorithm = match jwk.alg.as_deref().map(Algorithm::from_str) {
                None => None,
                Some(Ok(alg)) => Some(alg),
                Some(Err(_)) => {
                    tracing::warn!(kid = %jwk.kid, alg = ?jwk.alg, "Skipping JWK with unknown alg");
                    continue;
                }
            };

            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(decoding_key) => {
                    keys.insert(
                        jwk.kid.clone(),
                        Arc::new(VerificationKey {
                            kid: jwk.kid,
                            algorithm,
                            decoding_key,
                        }),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(KeySetError::Invalid(
                "key set did not include any usable RSA signing keys".to_string(),
            ));
        }

        Ok(Self {
            keys,
            fetched_at: Instant::now(),
        })
    }

    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }
}

/// Source of key-set documents.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Jwks, KeySetError>;
}

/// Fetches the key set over HTTPS with a timeout and bounded retry.
pub struct HttpKeySetFetcher {
    http_client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl HttpKeySetFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            url: url.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(&self) -> Result<Jwks, KeySetError> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| KeySetError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(KeySetError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(KeySetError::Invalid(format!("status {status}")));
        }

        response
            .json::<Jwks>()
            .await
            .map_err(|e| KeySetError::Invalid(format!("invalid JWKS JSON: {e}")))
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> Result<Jwks, KeySetError> {
        tracing::debug!(url = %self.url, "Fetching key set");
        with_retry_if(&self.retry, KeySetError::is_transient, || self.fetch_once()).await
    }
}

/// In-process key set, for local runs and tests.
#[derive(Default)]
pub struct StaticKeySetFetcher {
    jwks: std::sync::RwLock<Jwks>,
    failing: std::sync::atomic::AtomicBool,
    fetches: AtomicUsize,
}

impl StaticKeySetFetcher {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self {
            jwks: std::sync::RwLock::new(Jwks { keys }),
            ..Default::default()
        }
    }

    /// Replace the published keys, simulating a rotation.
    pub fn set_keys(&self, keys: Vec<Jwk>) {
        if let Ok(mut jwks) = self.jwks.write() {
            jwks.keys = keys;
        }
    }

    /// Make subsequent fetches fail with a transient error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for StaticKeySetFetcher {
    async fn fetch(&self) -> Result<Jwks, KeySetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up behind the refresh lock.
        tokio::task::yield_now().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(KeySetError::Transient("key set endpoint down".to_string()));
        }

        self.jwks
            .read()
            .map(|jwks| jwks.clone())
            .map_err(|_| KeySetError::Invalid("key set lock poisoned".to_string()))
    }
}

/// Shared, concurrency-safe cache of the current [`KeySet`].
pub struct KeySetCache {
    fetcher: Arc<dyn KeySetFetcher>,
    current: RwLock<Option<Arc<KeySet>>>,
    refresh_lock: Mutex<()>,
}

impl KeySetCache {
    pub fn new(fetcher: Arc<dyn KeySetFetcher>) -> Self {
        Self {
            fetcher,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Cached key set if it is at most `max_age` old, otherwise a fresh one.
    ///
    /// A failed fetch is returned as an error; a stale snapshot is never
    /// handed out.
    pub async fn get(&self, max_age: Duration) -> Result<Arc<KeySet>, KeySetError> {
        if let Some(set) = self.fresh(max_age).await {
            return Ok(set);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(set) = self.fresh(max_age).await {
            return Ok(set);
        }

        self.fetch_and_store().await
    }

    /// Re-fetch regardless of age, e.g. after an unknown `kid`.
    ///
    /// If the fetch fails, the previous snapshot is returned as long as it is
    /// within `max_age`.
    pub async fn refresh(&self, max_age: Duration) -> Result<Arc<KeySet>, KeySetError> {
        let requested_at = Instant::now();
        let _guard = self.refresh_lock.lock().await;

        // Coalesce with a refresh that completed after we asked for one.
        if let Some(set) = self.current.read().await.clone() {
            if set.fetched_at >= requested_at {
                return Ok(set);
            }
        }

        match self.fetch_and_store().await {
            Ok(set) => Ok(set),
            Err(e) => match self.fresh(max_age).await {
                Some(set) => {
                    tracing::warn!(error = %e, "Key set refresh failed; keeping cached keys");
                    Ok(set)
                }
                None => Err(e),
            },
        }
    }

    async fn fresh(&self, max_age: Duration) -> Option<Arc<KeySet>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|set| set.is_fresh(max_age))
            .cloned()
    }

    async fn fetch_and_store(&self) -> Result<Arc<KeySet>, KeySetError> {
        let jwks = self.fetcher.fetch().await?;
        let set = Arc::new(KeySet::from_jwks(jwks)?);

        tracing::debug!(keys = set.len(), "Key set cache refreshed");
        *self.current.write().await = Some(set.clone());
        Ok(set)
    }
}
