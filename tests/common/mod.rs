// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use axum::Router;
use idgate::config::Config;
use idgate::db::{AuthStore, SqliteStore};
use idgate::routes::create_router;
use idgate::services::auth_flow::StaticIdTokenSource;
use idgate::services::key_set::{Jwk, KeySetCache};
use idgate::services::mailer::MemoryMailer;
use idgate::services::{IdTokenSource, StaticKeySetFetcher, TokenVerifier};
use idgate::AppState;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_KID: &str = "test-key-1";
pub const TEST_ISSUER: &str = "https://idp.test";

/// Public modulus of `fixtures/signing_key.pem`.
pub const SIGNING_KEY_N: &str = "mNbGhU1AK-PPvZNoyOeZdJ8faU4IWY8FVUkUhTcq-1Or6F9ptiu9wXNRl5bha2jGZh3nI9Msz8DGYU3q6L7iUCmW7SfPwDYVv1Y6VkvXXXmqx3PqRSAt1VNVjIgWSSk_UOQ8ZRcldtZIhU57zU8lcQdJIh60Azl-5UYj7xdjCsXMvi0PRJLpIgekllHmTKvVmNClwxuPlN0Lc8Cz4gEdnG4y6qfTIgqJZFvWuRfe0R5T1PFFzDFCPm1npSeX65SAOU0Y7oYCnc-IjwvXf7sRL79Jujll3MBD1-H1e46Zcw14enSzWhZ4HAGok7ueVNcXAY7ohpc3NImLK_JLVoLmcw";

const SIGNING_KEY_PEM: &[u8] = include_bytes!("../fixtures/signing_key.pem");
const ROGUE_KEY_PEM: &[u8] = include_bytes!("../fixtures/rogue_key.pem");

/// The signing key as published in a JWKS under `kid`.
pub fn signing_jwk(kid: &str) -> Jwk {
    Jwk {
        kid: kid.to_string(),
        kty: "RSA".to_string(),
        alg: Some("RS256".to_string()),
        use_: Some("sig".to_string()),
        n: SIGNING_KEY_N.to_string(),
        e: "AQAB".to_string(),
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims for a valid platform token expiring in an hour.
pub fn valid_claims() -> Value {
    let now = now_secs();
    json!({
        "userId": "user-1",
        "projectId": "project-1",
        "userEmail": "Alice@Example.COM",
        "userFullName": "Alice Example",
        "userAvatar": null,
        "roles": "Admin, viewer,ADMIN",
        "projectTitle": "Demo Project",
        "iss": TEST_ISSUER,
        "iat": now,
        "exp": now + 3600,
    })
}

pub fn sign_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY_PEM).expect("signing key fixture");
    encode(&header, claims, &key).expect("sign token")
}

/// RS256 token signed by the fixture key under [`TEST_KID`].
pub fn sign(claims: &Value) -> String {
    sign_with_kid(claims, TEST_KID)
}

/// Signed by a key that is not in the key set, but claiming [`TEST_KID`].
pub fn sign_with_rogue_key(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let key = EncodingKey::from_rsa_pem(ROGUE_KEY_PEM).expect("rogue key fixture");
    encode(&header, claims, &key).expect("sign token")
}

/// HS256 token with the right `kid`, keyed with the public modulus.
pub fn sign_hs256(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(TEST_KID.to_string());
    encode(
        &header,
        claims,
        &EncodingKey::from_secret(SIGNING_KEY_N.as_bytes()),
    )
    .expect("sign token")
}

/// Application wired to in-memory fakes.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<dyn AuthStore>,
    pub keys: Arc<StaticKeySetFetcher>,
    pub mailer: Arc<MemoryMailer>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Raw token from the newest magic-link email.
    pub fn last_magic_link_token(&self) -> Option<String> {
        let message = self.mailer.sent().pop()?;
        let start = message.html.find("token=")? + "token=".len();
        let token: String = message.html[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        Some(token)
    }
}

pub async fn test_store() -> Arc<dyn AuthStore> {
    Arc::new(SqliteStore::in_memory().await.expect("in-memory store"))
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default(), |_| {}).await
}

/// Build a test app, letting the caller adjust the state before it is shared.
pub async fn create_test_app_with(config: Config, customize: impl FnOnce(&mut AppState)) -> TestApp {
    let store = test_store().await;
    let keys = Arc::new(StaticKeySetFetcher::new(vec![signing_jwk(TEST_KID)]));
    let mailer = Arc::new(MemoryMailer::default());
    let id_tokens: Arc<dyn IdTokenSource> = Arc::new(StaticIdTokenSource("test-id-token".into()));

    let mut state = AppState::new(
        config,
        store.clone(),
        keys.clone(),
        mailer.clone(),
        Some(id_tokens),
    )
    .expect("app state");
    customize(&mut state);

    TestApp {
        state: Arc::new(state),
        store,
        keys,
        mailer,
    }
}

/// Verifier over a static key set with the fixture key.
pub fn test_verifier() -> (TokenVerifier, Arc<StaticKeySetFetcher>) {
    let keys = Arc::new(StaticKeySetFetcher::new(vec![signing_jwk(TEST_KID)]));
    let cache = Arc::new(KeySetCache::new(keys.clone()));
    (TokenVerifier::new(&Config::test_default().jwt, cache), keys)
}

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}
