// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end social sign-in through the HTTP routes.
//!
//! A local server plays both the OAuth provider and the platform's hand-off
//! endpoint.

use axum::{
    body::Body,
    extract::Form,
    http::{header, Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use idgate::config::Config;
use idgate::error::AppError;
use idgate::services::social::ProviderEndpoints;
use idgate::services::{AccountResolver, MappedProfile, SocialProvider};
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;

mod common;

async fn token(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    let valid = form.get("grant_type").map(String::as_str) == Some("authorization_code")
        && form.get("code").map(String::as_str) == Some("provider-code")
        && form.get("code_verifier").is_some_and(|v| v.len() == 43);
    if valid {
        (StatusCode::OK, Json(json!({"access_token": "at-123"})))
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})))
    }
}

async fn userinfo() -> Json<Value> {
    Json(json!({
        "sub": "123",
        "email": "a@b.com",
        "name": "A B",
        "email_verified": true,
    }))
}

async fn auth_flow_complete(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"code": format!("code-for-{}", body["userInfo"]["uid"].as_str().unwrap_or(""))}))
}

/// App whose Google provider and platform hand-off both point at a local server.
async fn app_with_fake_upstreams() -> common::TestApp {
    let upstream = Router::new()
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .route("/internal/idp/auth-flow/complete", post(auth_flow_complete));
    let base = common::spawn_server(upstream).await;

    let mut config = Config::test_default();
    config.auth_flow.base_url = base.clone();
    let google = config.google.clone().unwrap();

    common::create_test_app_with(config, move |state| {
        state.social.register(
            SocialProvider::Google,
            &google,
            Some(ProviderEndpoints {
                authorize_url: format!("{base}/authorize"),
                token_url: format!("{base}/token"),
                userinfo_url: format!("{base}/userinfo"),
            }),
        );
    })
    .await
}

/// `name=value` pairs from every Set-Cookie header.
fn cookies(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn get_with_cookies(app: &common::TestApp, uri: &str, jar: &HashMap<String, String>) -> Response {
    let cookie = jar
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ");

    app.router()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Run the whole platform-initiated Google flow and return the final response.
async fn sign_in_with_google(app: &common::TestApp) -> Response {
    let mut jar = HashMap::new();

    let page = get_with_cookies(
        app,
        "/auth/sign-in?state=platform-state&source=platform&redirect-to=https%3A%2F%2Fplatform.test%2Fhome",
        &jar,
    )
    .await;
    assert_eq!(page.status(), StatusCode::OK);
    jar.extend(cookies(&page));
    assert!(jar.contains_key("idgate-params"));

    let start = get_with_cookies(app, "/auth/social/google", &jar).await;
    assert_eq!(start.status(), StatusCode::TEMPORARY_REDIRECT);
    jar.extend(cookies(&start));

    let authorize = reqwest::Url::parse(&location(&start)).unwrap();
    let query: HashMap<_, _> = authorize.query_pairs().into_owned().collect();
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["state"], jar["idgate-state"]);

    let callback = format!(
        "/auth/social/google/callback?code=provider-code&state={}",
        query["state"]
    );
    get_with_cookies(app, &callback, &jar).await
}

#[tokio::test]
async fn test_google_sign_in_creates_user_and_hands_off() {
    let app = app_with_fake_upstreams().await;

    let response = sign_in_with_google(&app).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let user = app.store.get_user_by_email("a@b.com").await.unwrap().unwrap();
    assert_eq!(user.name.as_deref(), Some("A B"));
    assert!(user.email_verified);

    let account = app
        .store
        .get_account_by_provider("google", "123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.user_id, user.id);
    assert_eq!(account.access_token.as_deref(), Some("at-123"));

    let target = location(&response);
    assert!(
        target.starts_with(&format!(
            "https://platform.test/auth/sign-in?code=code-for-{}&state=platform-state",
            user.id
        )),
        "{target}"
    );
    assert!(target.contains("redirect-to=https%3A%2F%2Fplatform.test%2Fhome"));

    let set = cookies(&response);
    assert!(!set["idgate-session"].is_empty());
    assert_eq!(set["idgate-state"], "");
    assert_eq!(set["idgate-params"], "");
}

#[tokio::test]
async fn test_repeat_sign_in_reuses_user_and_account() {
    let app = app_with_fake_upstreams().await;

    sign_in_with_google(&app).await;
    let first = app.store.get_user_by_email("a@b.com").await.unwrap().unwrap();

    let response = sign_in_with_google(&app).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let second = app.store.get_user_by_email("a@b.com").await.unwrap().unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(app.store.get_accounts_by_user_id(&first.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_callback_with_foreign_state_rejected() {
    let app = app_with_fake_upstreams().await;
    let jar = HashMap::from([("idgate-state".to_string(), "mine".to_string())]);

    let response = get_with_cookies(
        &app,
        "/auth/social/google/callback?code=provider-code&state=someone-elses",
        &jar,
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.get_user_by_email("a@b.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_callback_replay_rejected() {
    let app = app_with_fake_upstreams().await;
    let start = get_with_cookies(&app, "/auth/social/google", &HashMap::new()).await;
    let jar = cookies(&start);
    let state = jar["idgate-state"].clone();
    let callback = format!("/auth/social/google/callback?code=provider-code&state={state}");

    let first = get_with_cookies(&app, &callback, &jar).await;
    assert_eq!(first.status(), StatusCode::TEMPORARY_REDIRECT);
    // No platform flow in progress, so the user is sent to the platform
    assert_eq!(location(&first), "https://platform.test/auth/sign-in");

    let replay = get_with_cookies(&app, &callback, &jar).await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_provider_not_found() {
    let app = common::create_test_app().await;

    let response = get_with_cookies(&app, "/auth/social/microsoft", &HashMap::new()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get_with_cookies(&app, "/auth/social/myspace", &HashMap::new()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolver_links_existing_email_user() {
    let store = common::test_store().await;
    let resolver = AccountResolver::new(store.clone());

    let credential = resolver.resolve_credential("a@b.com").await.unwrap();
    let profile = MappedProfile {
        account_id: "123".to_string(),
        email: "a@b.com".to_string(),
        name: Some("A B".to_string()),
        image: None,
        email_verified: true,
    };

    let social = resolver
        .resolve_social(SocialProvider::Google, &profile, None)
        .await
        .unwrap();

    assert_eq!(social.user.id, credential.user.id);
    assert_eq!(social.account.provider_id, "google");
    // The name generated at credential sign-up is kept
    assert_eq!(social.user.name.as_deref(), Some("A"));
    assert_eq!(store.get_accounts_by_user_id(&social.user.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_resolver_refuses_unverified_email_for_existing_user() {
    let store = common::test_store().await;
    let resolver = AccountResolver::new(store.clone());

    let victim = resolver.resolve_credential("victim@corp.com").await.unwrap();
    let profile = MappedProfile {
        account_id: "attacker-oid".to_string(),
        email: "victim@corp.com".to_string(),
        name: None,
        image: None,
        email_verified: false,
    };

    let err = resolver
        .resolve_social(SocialProvider::Microsoft, &profile, None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Forbidden(_)), "{err:?}");
    assert!(store
        .get_account_by_provider("microsoft", "attacker-oid")
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.get_accounts_by_user_id(&victim.user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resolver_creates_user_for_unverified_new_email() {
    let store = common::test_store().await;
    let resolver = AccountResolver::new(store.clone());

    let profile = MappedProfile {
        account_id: "oid-1".to_string(),
        email: "new@corp.com".to_string(),
        name: Some("New Person".to_string()),
        image: None,
        email_verified: false,
    };

    let pair = resolver
        .resolve_social(SocialProvider::Microsoft, &profile, None)
        .await
        .unwrap();
    assert_eq!(pair.user.email, "new@corp.com");
    assert!(!pair.user.email_verified);

    // The linked subject keeps signing in without re-checking the email
    let again = resolver
        .resolve_social(SocialProvider::Microsoft, &profile, None)
        .await
        .unwrap();
    assert_eq!(again.user.id, pair.user.id);
}
