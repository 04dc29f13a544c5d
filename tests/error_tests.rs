// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use idgate::error::AppError;
use serde_json::Value;

async fn render(err: AppError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_unauthorized_hides_reason() {
    let (status, body) = render(AppError::Unauthorized("kid rogue not in key set".into())).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_state_expired_is_retryable() {
    let err = AppError::StateExpired("pkce state".into());
    assert!(err.is_state_expired());

    let (status, body) = render(err).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "state_expired");
    assert_eq!(body["details"], "Session expired, please retry");
}

#[tokio::test]
async fn test_rate_limited_reports_wait() {
    let (status, body) = render(AppError::RateLimited { wait_seconds: 42 }).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["details"], "Retry in 42 seconds");
}

#[tokio::test]
async fn test_store_failure_is_unavailable_not_missing() {
    let err = AppError::from(sqlx::Error::PoolClosed);
    assert!(matches!(err, AppError::Database(_)));

    let (status, body) = render(err).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "database_error");
}

#[tokio::test]
async fn test_internal_errors_are_generic() {
    let (status, body) = render(AppError::Internal(anyhow::anyhow!("secret detail"))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
    assert!(!body.to_string().contains("secret detail"));
}

#[test]
fn test_is_state_expired_no_match() {
    assert!(!AppError::Unauthorized("x".into()).is_state_expired());
    assert!(!AppError::BadRequest("x".into()).is_state_expired());
}
