// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cross-service auth-flow hand-off.
//!
//! After a user authenticates here, the platform backend is told who it was
//! and answers with a one-time code that the platform frontend redeems.

use super::email::split_name;
use super::identity::UserAccountPair;
use super::retry::{with_retry_if, RetryConfig};
use crate::config::AuthFlowConfig;
use crate::error::AppError;
use crate::redact::redact_value;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use google_cloud_auth::token::DefaultTokenSourceProvider;
use google_cloud_token::{TokenSource, TokenSourceProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts";
const CLOUD_PLATFORM_SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/cloud-platform"];
/// Refresh cached ID tokens this long before they expire.
const ID_TOKEN_REFRESH_BUFFER_SECS: i64 = 300;
/// Assumed lifetime when a token's `exp` cannot be read.
const ID_TOKEN_DEFAULT_LIFETIME_SECS: i64 = 600;

/// Verified identity sent along with the hand-off.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uid: String,
    pub signin_provider: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserInfo {
    pub fn from_pair(pair: &UserAccountPair) -> Self {
        let names = split_name(pair.user.name.as_deref());

        Self {
            uid: pair.user.id.clone(),
            signin_provider: pair.account.provider_id.clone(),
            email: pair.user.email.clone(),
            first_name: names.first_name,
            last_name: names.last_name,
            full_name: names.full_name,
            avatar: pair.user.image.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFlowRequest {
    pub state: String,
    pub user_info: UserInfo,
}

/// One-time code returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFlowCode {
    pub code: String,
}

/// Source of short-lived ID tokens authenticating this service.
#[async_trait]
pub trait IdTokenSource: Send + Sync {
    async fn id_token(&self) -> Result<String, AppError>;
}

/// Fixed token, for local runs and tests.
pub struct StaticIdTokenSource(pub String);

#[async_trait]
impl IdTokenSource for StaticIdTokenSource {
    async fn id_token(&self) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

/// Mints a fresh ID token on every call; see [`CachingIdTokenSource`].
#[async_trait]
pub trait IdTokenMinter: Send + Sync {
    async fn mint(&self) -> Result<String, AppError>;
}

#[derive(Clone)]
struct CachedIdToken {
    token: String,
    expires_at: i64,
}

/// Reuses a minted ID token until shortly before its `exp`.
pub struct CachingIdTokenSource {
    minter: Arc<dyn IdTokenMinter>,
    cached: Mutex<Option<CachedIdToken>>,
}

impl CachingIdTokenSource {
    pub fn new(minter: Arc<dyn IdTokenMinter>) -> Self {
        Self {
            minter,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IdTokenSource for CachingIdTokenSource {
    async fn id_token(&self) -> Result<String, AppError> {
        // Held across the mint so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(entry) = cached
            .as_ref()
            .filter(|entry| entry.expires_at > now + ID_TOKEN_REFRESH_BUFFER_SECS)
        {
            return Ok(entry.token.clone());
        }

        let token = self.minter.mint().await?;
        let expires_at = token_expiry(&token).unwrap_or_else(|| {
            tracing::warn!("Could not read ID token expiry; assuming default lifetime");
            now + ID_TOKEN_DEFAULT_LIFETIME_SECS
        });

        *cached = Some(CachedIdToken {
            token: token.clone(),
            expires_at,
        });
        tracing::debug!(expires_at, "Minted ID token");
        Ok(token)
    }
}

/// ID tokens for a service account, minted through the IAM credentials API.
///
/// The caller authenticates with an OAuth access token from Application
/// Default Credentials: a key file named by `GOOGLE_APPLICATION_CREDENTIALS`,
/// local gcloud credentials, or the metadata server.
pub struct IamIdTokenMinter {
    http_client: reqwest::Client,
    access_tokens: Arc<dyn TokenSource>,
    iam_url: String,
    service_account_email: String,
    audience: String,
}

#[derive(Deserialize)]
struct GenerateIdTokenResponse {
    token: String,
}

impl IamIdTokenMinter {
    pub fn new(
        access_tokens: Arc<dyn TokenSource>,
        service_account_email: impl Into<String>,
        audience: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            access_tokens,
            iam_url: IAM_CREDENTIALS_URL.to_string(),
            service_account_email: service_account_email.into(),
            audience: audience.into(),
        })
    }

    /// Authenticate with Application Default Credentials.
    pub async fn from_default_credentials(
        service_account_email: impl Into<String>,
        audience: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let provider = DefaultTokenSourceProvider::new(
            google_cloud_auth::project::Config::default().with_scopes(&CLOUD_PLATFORM_SCOPES),
        )
        .await?;

        Self::new(provider.token_source(), service_account_email, audience, timeout)
    }

    /// Base URL of the service-account collection, for tests.
    pub fn with_iam_url(mut self, url: impl Into<String>) -> Self {
        self.iam_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl IdTokenMinter for IamIdTokenMinter {
    async fn mint(&self) -> Result<String, AppError> {
        // Already carries the "Bearer " prefix
        let authorization = self
            .access_tokens
            .token()
            .await
            .map_err(|e| AppError::Upstream(format!("default credentials unavailable: {e}")))?;

        let url = format!(
            "{}/{}:generateIdToken",
            self.iam_url, self.service_account_email
        );

        let minted: GenerateIdTokenResponse = self
            .http_client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&serde_json::json!({ "audience": self.audience, "includeEmail": true }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Upstream(format!("generateIdToken failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid generateIdToken response: {e}")))?;

        tracing::debug!(
            service_account = %self.service_account_email,
            "Impersonated ID token issued"
        );
        Ok(minted.token)
    }
}

/// `exp` of a JWT, read without verifying it. Only used for cache expiry of
/// tokens we minted ourselves.
fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

#[derive(Debug)]
enum CallError {
    Transient(String),
    Fatal(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transient(msg) | CallError::Fatal(msg) => f.write_str(msg),
        }
    }
}

/// Client for `POST {base}{backchannel}/idp/auth-flow/complete`.
pub struct AuthFlowClient {
    http_client: reqwest::Client,
    endpoint: String,
    id_tokens: Option<Arc<dyn IdTokenSource>>,
    retry: RetryConfig,
}

impl AuthFlowClient {
    pub fn new(
        config: &AuthFlowConfig,
        timeout: Duration,
        id_tokens: Option<Arc<dyn IdTokenSource>>,
    ) -> anyhow::Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let endpoint = match config.backchannel_prefix.trim_matches('/') {
            "" => format!("{base}/idp/auth-flow/complete"),
            prefix => format!("{base}/{prefix}/idp/auth-flow/complete"),
        };

        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint,
            id_tokens,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hand the verified identity over and return the one-time code.
    ///
    /// Network errors and 5xx responses are retried with backoff; any other
    /// non-success status and a response without `code` fail immediately.
    pub async fn complete_auth_flow(
        &self,
        request: &AuthFlowRequest,
    ) -> Result<AuthFlowCode, AppError> {
        let id_tokens = self.id_tokens.as_ref().ok_or_else(|| {
            AppError::Config("Service account authentication is not configured".to_string())
        })?;
        let id_token = id_tokens.id_token().await?;

        tracing::debug!(
            endpoint = %self.endpoint,
            request = %redact_value(serde_json::to_value(request).unwrap_or_default()),
            "Completing auth flow"
        );

        let code = with_retry_if(
            &self.retry,
            |e| matches!(e, CallError::Transient(_)),
            || self.post(request, &id_token),
        )
        .await
        .map_err(|e| AppError::Upstream(format!("auth flow completion failed: {e}")))?;

        tracing::info!(
            uid = %request.user_info.uid,
            provider = %request.user_info.signin_provider,
            "Auth flow completed"
        );
        Ok(AuthFlowCode { code })
    }

    async fn post(&self, request: &AuthFlowRequest, id_token: &str) -> Result<String, CallError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(id_token)
            .json(request)
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Transient(format!("reading body failed: {e}")))?;

        if status.is_server_error() {
            return Err(CallError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(CallError::Fatal(format!("status {status}")));
        }

        serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(Value::as_str)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CallError::Fatal("response did not contain a code".to_string()))
    }
}
