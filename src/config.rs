// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup. Missing provider secrets or malformed
//! values abort startup instead of failing per request.

use jsonwebtoken::Algorithm;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "IDGATE_";

/// Which persistence backend to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbConfig {
    /// Embedded file-backed SQLite database.
    Sqlite { path: String },
    /// Networked MySQL database.
    Mysql {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
        connection_limit: u32,
    },
}

/// Bearer token verification settings.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub algorithm: Algorithm,
    pub clock_tolerance: Duration,
    pub key_cache_ttl: Duration,
    pub jwks_url: String,
}

/// Credentials for one social login provider.
#[derive(Debug, Clone)]
pub struct SocialProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Azure AD tenant; only meaningful for Microsoft.
    pub tenant_id: Option<String>,
}

/// Cross-service auth-flow endpoint and its service credentials.
#[derive(Debug, Clone)]
pub struct AuthFlowConfig {
    pub base_url: String,
    pub backchannel_prefix: String,
    pub service_account_email: Option<String>,
    pub target_audience: Option<String>,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public URL of this service, used for callback and magic-link URLs
    pub base_url: String,
    /// Server port
    pub port: u16,
    pub db: DbConfig,
    pub jwt: JwtConfig,
    /// Platform page that receives the one-time code after sign-in
    pub platform_sign_in_url: String,
    pub platform_sign_up_url: String,
    pub sign_out_redirect_url: Option<String>,
    /// Origins a `redirectTo` parameter may point at
    pub allowed_redirect_origins: Vec<String>,
    pub auth_flow: AuthFlowConfig,
    /// Timeout applied to every outbound HTTP call
    pub http_timeout: Duration,
    pub magic_link_ttl: Duration,
    pub magic_link_resend_cooldown: Duration,
    /// Outbound mail webhook; links are only logged when unset
    pub mail_webhook_url: Option<String>,
    pub auth_state_ttl: Duration,
    pub session_ttl: Duration,
    pub google: Option<SocialProviderConfig>,
    pub microsoft: Option<SocialProviderConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let base_url = optional("BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            db: load_db_config()?,
            jwt: JwtConfig {
                issuer: required("JWT_ISSUER")?,
                algorithm: parse_algorithm(
                    optional("JWT_ALGORITHM").as_deref().unwrap_or("RS256"),
                )?,
                clock_tolerance: Duration::from_secs(parse_or("JWT_CLOCK_TOLERANCE_SECS", 5)?),
                key_cache_ttl: Duration::from_secs(parse_or("JWT_KEY_CACHE_TTL_SECS", 3600)?),
                jwks_url: required("JWKS_URL")?,
            },
            platform_sign_in_url: required("PLATFORM_SIGN_IN_URL")?,
            platform_sign_up_url: required("PLATFORM_SIGN_UP_URL")?,
            sign_out_redirect_url: optional("SIGN_OUT_REDIRECT_URL"),
            allowed_redirect_origins: optional("ALLOWED_REDIRECT_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            auth_flow: AuthFlowConfig {
                base_url: required("AUTH_FLOW_BASE_URL")?,
                backchannel_prefix: optional("AUTH_FLOW_BACKCHANNEL_PREFIX")
                    .unwrap_or_else(|| "/internal".to_string()),
                service_account_email: optional("C2C_SERVICE_ACCOUNT_EMAIL"),
                target_audience: optional("C2C_TARGET_AUDIENCE"),
            },
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 5)?),
            magic_link_ttl: Duration::from_secs(parse_or("MAGIC_LINK_TTL_SECS", 3600)?),
            magic_link_resend_cooldown: Duration::from_secs(parse_or(
                "MAGIC_LINK_RESEND_COOLDOWN_SECS",
                60,
            )?),
            mail_webhook_url: optional("MAIL_WEBHOOK_URL"),
            auth_state_ttl: Duration::from_secs(parse_or("AUTH_STATE_TTL_SECS", 600)?),
            session_ttl: Duration::from_secs(parse_or("SESSION_TTL_SECS", 7 * 24 * 60 * 60)?),
            google: load_provider("GOOGLE", false)?,
            microsoft: load_provider("MICROSOFT", true)?,
            base_url,
        })
    }

    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            port: 8080,
            db: DbConfig::Sqlite {
                path: ":memory:".to_string(),
            },
            jwt: JwtConfig {
                issuer: "https://idp.test".to_string(),
                algorithm: Algorithm::RS256,
                clock_tolerance: Duration::from_secs(5),
                key_cache_ttl: Duration::from_secs(3600),
                jwks_url: "https://idp.test/.well-known/jwks.json".to_string(),
            },
            platform_sign_in_url: "https://platform.test/auth/sign-in".to_string(),
            platform_sign_up_url: "https://platform.test/auth/sign-up".to_string(),
            sign_out_redirect_url: Some("https://platform.test/sign-out".to_string()),
            allowed_redirect_origins: vec!["https://platform.test".to_string()],
            auth_flow: AuthFlowConfig {
                base_url: "https://idp.test".to_string(),
                backchannel_prefix: "/internal".to_string(),
                service_account_email: Some("svc@test.iam.gserviceaccount.com".to_string()),
                target_audience: Some("https://idp.test".to_string()),
            },
            http_timeout: Duration::from_secs(5),
            magic_link_ttl: Duration::from_secs(3600),
            magic_link_resend_cooldown: Duration::from_secs(60),
            mail_webhook_url: None,
            auth_state_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            google: Some(SocialProviderConfig {
                client_id: "google-client".to_string(),
                client_secret: "google-secret".to_string(),
                tenant_id: None,
            }),
            microsoft: None,
        }
    }
}

fn load_db_config() -> Result<DbConfig, ConfigError> {
    let db_type = optional("DB_TYPE")
        .unwrap_or_else(|| "sqlite".to_string())
        .to_lowercase();

    match db_type.as_str() {
        "sqlite" => Ok(DbConfig::Sqlite {
            path: optional("SQLITE_PATH").unwrap_or_else(|| "data/idgate.db".to_string()),
        }),
        "mysql" => Ok(DbConfig::Mysql {
            host: required("MYSQL_HOST")?,
            port: parse_or("MYSQL_PORT", 3306)?,
            user: required("MYSQL_USER")?,
            password: required("MYSQL_PASSWORD")?,
            database: required("MYSQL_DB")?,
            connection_limit: parse_or("MYSQL_CONNECTION_LIMIT", 10)?,
        }),
        other => Err(ConfigError::Invalid {
            name: prefixed("DB_TYPE"),
            reason: format!("unsupported database type {other:?}"),
        }),
    }
}

/// A provider is enabled only when both halves of its credentials are set.
fn load_provider(
    name: &str,
    with_tenant: bool,
) -> Result<Option<SocialProviderConfig>, ConfigError> {
    let client_id = optional(&format!("{name}_CLIENT_ID"));
    let client_secret = optional(&format!("{name}_CLIENT_SECRET"));

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Ok(Some(SocialProviderConfig {
            client_id,
            client_secret,
            tenant_id: if with_tenant {
                optional(&format!("{name}_TENANT_ID"))
            } else {
                None
            },
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Missing(prefixed(&format!(
            "{name}_CLIENT_SECRET"
        )))),
        (None, Some(_)) => Err(ConfigError::Missing(prefixed(&format!("{name}_CLIENT_ID")))),
    }
}

pub(crate) fn parse_algorithm(raw: &str) -> Result<Algorithm, ConfigError> {
    let algorithm = Algorithm::from_str(raw.trim()).map_err(|_| ConfigError::Invalid {
        name: prefixed("JWT_ALGORITHM"),
        reason: format!("unknown algorithm {raw:?}"),
    })?;

    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Ok(algorithm),
        _ => Err(ConfigError::Invalid {
            name: prefixed("JWT_ALGORITHM"),
            reason: format!("{raw} is not an asymmetric RSA algorithm"),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn prefixed(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

fn optional(name: &str) -> Option<String> {
    env::var(prefixed(name))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::Missing(prefixed(name)))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: prefixed(name),
            reason: e.to_string(),
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}
