// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer token authentication middleware.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header the platform uses when a plain `Authorization` header is taken.
pub const PLATFORM_AUTH_HEADER: &str = "x-owox-authorization";

/// Middleware that requires a verified bearer token.
///
/// On success the normalized [`crate::models::Payload`] is stored in the
/// request extensions.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let payload = state.token_verifier.verify(&token).await?;
    tracing::debug!(user_id = %payload.user_id, project_id = %payload.project_id, "Token verified");

    request.extensions_mut().insert(payload);
    Ok(next.run(request).await)
}

/// Token from `Authorization: Bearer`, else the platform header (which may
/// carry the token with or without the scheme).
fn bearer_token(request: &Request) -> Option<String> {
    let headers = request.headers();

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
    }

    headers
        .get(PLATFORM_AUTH_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
