// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! PKCE auth state tests against the SQLite store.

use chrono::{Duration as ChronoDuration, Utc};
use idgate::error::AppError;
use idgate::models::AuthStateLookup;
use idgate::services::pkce::code_challenge_s256;
use idgate::services::{PkceError, PkceStore};
use std::sync::Arc;
use std::time::Duration;

mod common;

async fn pkce_store() -> PkceStore {
    PkceStore::new(common::test_store().await, Duration::from_secs(600))
}

#[tokio::test]
async fn test_missing_and_expired_are_distinct() {
    let pkce = pkce_store().await;
    pkce.save("old", "verifier", Utc::now() - ChronoDuration::seconds(1))
        .await
        .unwrap();

    assert_eq!(pkce.get("never-saved").await.unwrap(), AuthStateLookup::NotFound);
    assert_eq!(pkce.get("old").await.unwrap(), AuthStateLookup::Expired);
}

#[tokio::test]
async fn test_save_replaces_verifier() {
    let pkce = pkce_store().await;
    let expires = Utc::now() + ChronoDuration::minutes(5);
    pkce.save("s", "first", expires).await.unwrap();
    pkce.save("s", "second", expires).await.unwrap();

    assert_eq!(
        pkce.get("s").await.unwrap(),
        AuthStateLookup::Code("second".to_string())
    );
}

#[tokio::test]
async fn test_begin_then_consume_once() {
    let pkce = pkce_store().await;
    let challenge = pkce.begin().await.unwrap();

    assert_eq!(challenge.code_challenge, code_challenge_s256(&challenge.code_verifier));
    assert_eq!(challenge.code_verifier.len(), 43);

    let verifier = pkce.consume(&challenge.state).await.unwrap();
    assert_eq!(verifier, challenge.code_verifier);

    let err = pkce.consume(&challenge.state).await.unwrap_err();
    assert!(matches!(err, PkceError::NotFound), "{err:?}");
}

#[tokio::test]
async fn test_expired_state_maps_to_retryable_error() {
    let pkce = pkce_store().await;
    pkce.save("stale", "v", Utc::now() - ChronoDuration::seconds(30))
        .await
        .unwrap();

    let err = pkce.consume("stale").await.unwrap_err();
    assert!(matches!(err, PkceError::Expired));
    assert!(AppError::from(err).is_state_expired());

    // The expired row is gone afterwards
    assert_eq!(pkce.get("stale").await.unwrap(), AuthStateLookup::NotFound);
}

#[tokio::test]
async fn test_concurrent_consume_single_winner() {
    let pkce = Arc::new(pkce_store().await);
    let challenge = pkce.begin().await.unwrap();

    let (a, b) = tokio::join!(
        {
            let pkce = pkce.clone();
            let state = challenge.state.clone();
            async move { pkce.consume(&state).await }
        },
        {
            let pkce = pkce.clone();
            let state = challenge.state.clone();
            async move { pkce.consume(&state).await }
        }
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_purge_removes_only_expired() {
    let pkce = pkce_store().await;
    pkce.save("old", "v", Utc::now() - ChronoDuration::seconds(1))
        .await
        .unwrap();
    let live = pkce.begin().await.unwrap();

    assert_eq!(pkce.purge_expired().await.unwrap(), 1);
    assert!(matches!(
        pkce.get(&live.state).await.unwrap(),
        AuthStateLookup::Code(_)
    ));
}
