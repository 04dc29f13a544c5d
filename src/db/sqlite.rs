// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Embedded SQLite backend.

use super::AuthStore;
use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT NOT NULL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NULL,
        image TEXT NULL,
        email_verified INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS accounts (
        id TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        provider_id TEXT NOT NULL,
        provider_account_id TEXT NOT NULL,
        access_token TEXT NULL,
        refresh_token TEXT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (provider_id, provider_account_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_accounts_user_id ON accounts (user_id)",
    "CREATE TABLE IF NOT EXISTS auth_states (
        state TEXT NOT NULL PRIMARY KEY,
        code_verifier TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_auth_states_expires_at ON auth_states (expires_at)",
    "CREATE TABLE IF NOT EXISTS magic_links (
        token_hash TEXT NOT NULL PRIMARY KEY,
        email TEXT NOT NULL,
        intent TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        used INTEGER NOT NULL DEFAULT 0,
        used_at TEXT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_magic_links_email ON magic_links (email, used, expires_at)",
    "CREATE TABLE IF NOT EXISTS sessions (
        token_hash TEXT NOT NULL PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions (expires_at)",
];

const UPSERT_AUTH_STATE: &str = "INSERT INTO auth_states (state, code_verifier, created_at, expires_at)
     VALUES (?, ?, ?, ?)
     ON CONFLICT(state) DO UPDATE SET
       code_verifier = excluded.code_verifier,
       created_at = excluded.created_at,
       expires_at = excluded.expires_at";

/// SQLite-backed [`AuthStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// `:memory:` opens a private in-memory database instead.
    pub async fn new(path: &str) -> Result<Self, AppError> {
        if path == ":memory:" {
            return Self::in_memory().await;
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Database(format!(
                        "Failed to create SQLite directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to open SQLite database: {}", e)))?;

        tracing::info!(path, "Opened SQLite auth store");

        Ok(Self { pool })
    }

    /// Private in-memory database with its schema already created.
    ///
    /// The pool holds a single connection that is never recycled, since the
    /// database lives and dies with it.
    pub async fn in_memory() -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }
}

impl_auth_store! {
    store: SqliteStore,
    backend: "sqlite",
    schema: SCHEMA,
    upsert_auth_state: UPSERT_AUTH_STATE,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthStateLookup, NewAccount, NewUser, Session};
    use crate::time_utils::now_utc;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: None,
            image: None,
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user(new_user(" Alice@Example.COM ")).await.unwrap();

        assert_eq!(user.email, "alice@example.com");
        let found = store.get_user_by_email("ALICE@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn duplicate_email_returns_existing_user() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.create_user(new_user("a@b.com")).await.unwrap();
        let second = store.create_user(new_user("A@B.com")).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user(new_user("a@b.com")).await.unwrap();
        store
            .create_account(NewAccount {
                user_id: user.id.clone(),
                provider_id: "google".into(),
                provider_account_id: "123".into(),
                access_token: None,
                refresh_token: None,
            })
            .await
            .unwrap();
        let now = now_utc();
        store
            .create_session(&Session {
                token_hash: "hash".into(),
                user_id: user.id.clone(),
                created_at: now,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        assert_eq!(store.delete_user(&user.id).await.unwrap(), 3);
        assert!(store.get_user_by_id(&user.id).await.unwrap().is_none());
        assert!(store
            .get_account_by_provider("google", "123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn saving_auth_state_twice_replaces_verifier() {
        let store = SqliteStore::in_memory().await.unwrap();
        let expires_at = now_utc() + Duration::minutes(10);
        store.save_auth_state("st", "first", expires_at).await.unwrap();
        store.save_auth_state("st", "second", expires_at).await.unwrap();

        assert_eq!(
            store.get_auth_state("st").await.unwrap(),
            AuthStateLookup::Code("second".into())
        );
        assert!(store.delete_auth_state("st").await.unwrap());
        assert!(!store.delete_auth_state("st").await.unwrap());
    }

    #[tokio::test]
    async fn healthy_until_shutdown() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.is_healthy().await);
        store.shutdown().await;
        assert!(!store.is_healthy().await);
    }
}
