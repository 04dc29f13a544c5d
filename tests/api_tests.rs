// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health check and bearer-protected API tests.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

mod common;

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_auth(uri: &str, name: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = common::create_test_app().await;

    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "sqlite");
}

#[tokio::test]
async fn test_health_unavailable_after_shutdown() {
    let app = common::create_test_app().await;
    app.store.shutdown().await;

    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unavailable");
}

#[tokio::test]
async fn test_me_requires_token() {
    let app = common::create_test_app().await;

    let response = app.router().oneshot(get("/api/me")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn test_me_returns_payload() {
    let app = common::create_test_app().await;
    let token = common::sign(&common::valid_claims());

    let response = app
        .router()
        .oneshot(get_with_auth(
            "/api/me",
            header::AUTHORIZATION.as_str(),
            &format!("Bearer {token}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["userId"], "user-1");
    assert_eq!(json["email"], "alice@example.com");
    assert_eq!(json["roles"], serde_json::json!(["admin", "viewer"]));
    assert_eq!(json["projectTitle"], "Demo Project");
}

#[tokio::test]
async fn test_me_accepts_platform_header() {
    let app = common::create_test_app().await;
    let token = common::sign(&common::valid_claims());

    let response = app
        .router()
        .oneshot(get_with_auth("/api/me", "x-owox-authorization", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejections_look_identical() {
    let app = common::create_test_app().await;

    let mut expired = common::valid_claims();
    expired["exp"] = (common::now_secs() - 3600).into();

    let tokens = [
        common::sign_with_rogue_key(&common::valid_claims()),
        common::sign_with_kid(&common::valid_claims(), "unknown-kid"),
        common::sign(&expired),
        common::sign_hs256(&common::valid_claims()),
    ];

    for token in tokens {
        let response = app
            .router()
            .oneshot(get_with_auth(
                "/api/me",
                header::AUTHORIZATION.as_str(),
                &format!("Bearer {token}"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "unauthorized"})
        );
    }
}

#[tokio::test]
async fn test_key_set_outage_is_service_error() {
    let app = common::create_test_app().await;
    app.keys.set_failing(true);
    let token = common::sign(&common::valid_claims());

    let response = app
        .router()
        .oneshot(get_with_auth(
            "/api/me",
            header::AUTHORIZATION.as_str(),
            &format!("Bearer {token}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_security_headers_applied() {
    let app = common::create_test_app().await;

    let response = app.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.headers().get("X-Frame-Options").unwrap(), "DENY");
    assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
}
