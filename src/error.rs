// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing, invalid or expired credential. The reason is for logs only.
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// PKCE state or magic link expired; the caller may restart the flow.
    #[error("State expired: {0}")]
    StateExpired(String),

    #[error("Rate limited, retry in {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Remote key set, social provider or cross-service call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn is_state_expired(&self) -> bool {
        matches!(self, AppError::StateExpired(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized(reason) => {
                tracing::info!(reason = %reason, "Authentication failed");
                (StatusCode::UNAUTHORIZED, "unauthorized", None)
            }
            AppError::Forbidden(reason) => {
                tracing::info!(reason = %reason, "Forbidden");
                (StatusCode::FORBIDDEN, "forbidden", None)
            }
            AppError::StateExpired(reason) => {
                tracing::info!(reason = %reason, "Auth state expired");
                (
                    StatusCode::UNAUTHORIZED,
                    "state_expired",
                    Some("Session expired, please retry".to_string()),
                )
            }
            AppError::RateLimited { wait_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some(format!("Retry in {wait_seconds} seconds")),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Upstream(msg) => {
                tracing::error!(error = %msg, "Upstream error");
                (StatusCode::BAD_GATEWAY, "upstream_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::SERVICE_UNAVAILABLE, "database_error", None)
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
