// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Social login providers: authorization redirects, code exchange and
//! profile normalization.

use super::retry::{with_retry_if, RetryConfig};
use crate::config::{Config, SocialProviderConfig};
use crate::error::AppError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Supported providers. Adding one means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialProvider {
    Google,
    Microsoft,
}

impl SocialProvider {
    pub const ALL: [SocialProvider; 2] = [SocialProvider::Google, SocialProvider::Microsoft];

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "google" => Some(SocialProvider::Google),
            "microsoft" => Some(SocialProvider::Microsoft),
            _ => None,
        }
    }

    /// Provider id stored on accounts.
    pub fn id(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Microsoft => "microsoft",
        }
    }

    /// Normalize a raw userinfo document.
    ///
    /// A profile without a stable subject or without an email is rejected.
    pub fn map_profile(&self, raw: &Value) -> Result<MappedProfile, ProfileError> {
        let account_id = match self {
            SocialProvider::Google => first_string(raw, &["sub", "id"]),
            SocialProvider::Microsoft => first_string(raw, &["oid", "id", "sub"]),
        }
        .ok_or(ProfileError::MissingField {
            provider: *self,
            field: "sub",
        })?;

        let email = match self {
            SocialProvider::Google => first_string(raw, &["email"]),
            SocialProvider::Microsoft => {
                first_string(raw, &["email", "mail", "preferred_username", "userPrincipalName"])
            }
        }
        .filter(|email| email.contains('@'))
        .map(|email| email.trim().to_lowercase())
        .ok_or(ProfileError::MissingField {
            provider: *self,
            field: "email",
        })?;

        let email_verified = ["email_verified", "verified_email", "emailVerified"]
            .iter()
            .any(|key| truthy(raw.get(*key)));

        Ok(MappedProfile {
            account_id,
            email,
            name: first_string(raw, &["name", "displayName", "given_name"]),
            image: first_string(raw, &["picture", "image"]),
            email_verified,
        })
    }
}

impl fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Provider-independent profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedProfile {
    pub account_id: String,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("{provider} profile is missing required field {field}")]
    MissingField {
        provider: SocialProvider,
        field: &'static str,
    },
}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

/// Tokens returned by a provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// OAuth endpoints for one provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl ProviderEndpoints {
    pub fn for_provider(provider: SocialProvider, tenant_id: Option<&str>) -> Self {
        match provider {
            SocialProvider::Google => Self {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            },
            SocialProvider::Microsoft => {
                let tenant = tenant_id.unwrap_or("common");
                Self {
                    authorize_url: format!(
                        "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize"
                    ),
                    token_url: format!(
                        "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"
                    ),
                    userinfo_url: "https://graph.microsoft.com/oidc/userinfo".to_string(),
                }
            }
        }
    }
}

struct ProviderClient {
    client_id: String,
    client_secret: String,
    endpoints: ProviderEndpoints,
}

/// OAuth client for every configured provider.
pub struct SocialAuth {
    http_client: reqwest::Client,
    base_url: String,
    providers: HashMap<SocialProvider, ProviderClient>,
    retry: RetryConfig,
}

impl SocialAuth {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut social = Self {
            http_client: reqwest::Client::builder()
                .timeout(config.http_timeout)
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            providers: HashMap::new(),
            retry: RetryConfig::default(),
        };

        for provider in SocialProvider::ALL {
            let settings = match provider {
                SocialProvider::Google => config.google.as_ref(),
                SocialProvider::Microsoft => config.microsoft.as_ref(),
            };
            if let Some(settings) = settings {
                social.register(provider, settings, None);
                tracing::info!(provider = %provider, "Social provider enabled");
            }
        }

        Ok(social)
    }

    /// Enable a provider, optionally overriding its endpoints.
    pub fn register(
        &mut self,
        provider: SocialProvider,
        settings: &SocialProviderConfig,
        endpoints: Option<ProviderEndpoints>,
    ) {
        let endpoints = endpoints.unwrap_or_else(|| {
            ProviderEndpoints::for_provider(provider, settings.tenant_id.as_deref())
        });

        self.providers.insert(
            provider,
            ProviderClient {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                endpoints,
            },
        );
    }

    pub fn is_enabled(&self, provider: SocialProvider) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn enabled(&self) -> Vec<SocialProvider> {
        SocialProvider::ALL
            .into_iter()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    pub fn callback_url(&self, provider: SocialProvider) -> String {
        format!("{}/auth/social/{}/callback", self.base_url, provider.id())
    }

    /// Provider authorization URL carrying `state` and an S256 challenge.
    pub fn authorize_url(
        &self,
        provider: SocialProvider,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, AppError> {
        let client = self.client(provider)?;

        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
            ("prompt", "select_account"),
        ];
        if provider == SocialProvider::Google {
            params.push(("access_type", "offline"));
        }

        let redirect_uri = self.callback_url(provider);
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .chain(std::iter::once(format!(
                "redirect_uri={}",
                urlencoding::encode(&redirect_uri)
            )))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}?{}", client.endpoints.authorize_url, query))
    }

    /// Exchange the callback `code` and fetch the normalized profile.
    pub async fn complete(
        &self,
        provider: SocialProvider,
        code: &str,
        code_verifier: &str,
    ) -> Result<(MappedProfile, ProviderTokens), AppError> {
        let tokens = self.exchange_code(provider, code, code_verifier).await?;
        let raw = self.fetch_profile(provider, &tokens.access_token).await?;
        let profile = provider.map_profile(&raw)?;

        tracing::info!(
            provider = %provider,
            email_verified = profile.email_verified,
            "Social profile mapped"
        );

        Ok((profile, tokens))
    }

    /// Authorization codes are single use, so this is not retried.
    pub async fn exchange_code(
        &self,
        provider: SocialProvider,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderTokens, AppError> {
        let client = self.client(provider)?;
        let redirect_uri = self.callback_url(provider);

        let response = self
            .http_client
            .post(&client.endpoints.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{provider} token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = %provider, %status, body = %body, "Token exchange rejected");
            return Err(AppError::Upstream(format!(
                "{provider} token exchange returned {status}"
            )));
        }

        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| AppError::Upstream(format!("{provider} token response invalid: {e}")))
    }

    pub async fn fetch_profile(
        &self,
        provider: SocialProvider,
        access_token: &str,
    ) -> Result<Value, AppError> {
        let client = self.client(provider)?;

        with_retry_if(
            &self.retry,
            |e: &FetchError| e.transient,
            || async {
                let response = self
                    .http_client
                    .get(&client.endpoints.userinfo_url)
                    .bearer_auth(access_token)
                    .send()
                    .await
                    .map_err(|e| FetchError::retryable(format!("request failed: {e}")))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError {
                        transient: status.is_server_error(),
                        message: format!("status {status}"),
                    });
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|e| FetchError::fatal(format!("invalid JSON: {e}")))
            },
        )
        .await
        .map_err(|e| AppError::Upstream(format!("{provider} userinfo: {}", e.message)))
    }

    fn client(&self, provider: SocialProvider) -> Result<&ProviderClient, AppError> {
        self.providers
            .get(&provider)
            .ok_or_else(|| AppError::NotFound(format!("Provider {provider} is not enabled")))
    }
}

#[derive(Debug)]
struct FetchError {
    transient: bool,
    message: String,
}

impl FetchError {
    fn retryable(message: String) -> Self {
        Self {
            transient: true,
            message,
        }
    }

    fn fatal(message: String) -> Self {
        Self {
            transient: false,
            message,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .filter_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
