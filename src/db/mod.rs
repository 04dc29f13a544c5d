// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer.
//!
//! One [`AuthStore`] contract with two interchangeable backends: an embedded
//! SQLite file and a networked MySQL server. Callers only ever see
//! `Arc<dyn AuthStore>`; the backend is picked from configuration at startup.

#[macro_use]
mod impl_store;

pub mod mysql;
pub mod sqlite;

pub use mysql::MysqlStore;
pub use sqlite::SqliteStore;

use crate::config::DbConfig;
use crate::error::AppError;
use crate::models::{
    Account, AuthStateLookup, MagicLink, NewAccount, NewUser, Session, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Statements both backends share. Both dialects use `?` placeholders.
pub(crate) mod sql {
    pub const SELECT_USER_BY_ID: &str =
        "SELECT id, email, name, image, email_verified, created_at FROM users WHERE id = ?";
    pub const SELECT_USER_BY_EMAIL: &str =
        "SELECT id, email, name, image, email_verified, created_at FROM users WHERE email = ?";
    pub const INSERT_USER: &str = "INSERT INTO users (id, email, name, image, email_verified, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)";
    pub const UPDATE_USER_NAME: &str = "UPDATE users SET name = ? WHERE id = ?";
    pub const DELETE_USER_SESSIONS: &str = "DELETE FROM sessions WHERE user_id = ?";
    pub const DELETE_USER_ACCOUNTS: &str = "DELETE FROM accounts WHERE user_id = ?";
    pub const DELETE_USER: &str = "DELETE FROM users WHERE id = ?";

    pub const SELECT_LATEST_ACCOUNT_BY_USER: &str = "SELECT id, user_id, provider_id, provider_account_id, access_token, refresh_token, created_at \
         FROM accounts WHERE user_id = ? ORDER BY created_at DESC LIMIT 1";
    pub const SELECT_ACCOUNTS_BY_USER: &str = "SELECT id, user_id, provider_id, provider_account_id, access_token, refresh_token, created_at \
         FROM accounts WHERE user_id = ? ORDER BY created_at DESC";
    pub const SELECT_ACCOUNT_BY_PROVIDER: &str = "SELECT id, user_id, provider_id, provider_account_id, access_token, refresh_token, created_at \
         FROM accounts WHERE provider_id = ? AND provider_account_id = ?";
    pub const INSERT_ACCOUNT: &str = "INSERT INTO accounts (id, user_id, provider_id, provider_account_id, access_token, refresh_token, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)";

    pub const SELECT_AUTH_STATE: &str =
        "SELECT code_verifier, expires_at FROM auth_states WHERE state = ? LIMIT 1";
    pub const DELETE_AUTH_STATE: &str = "DELETE FROM auth_states WHERE state = ?";
    pub const PURGE_AUTH_STATES: &str = "DELETE FROM auth_states WHERE expires_at <= ?";

    pub const SUPERSEDE_MAGIC_LINKS: &str = "UPDATE magic_links SET used = ?, used_at = ? \
         WHERE email = ? AND used = ? AND expires_at > ?";
    pub const INSERT_MAGIC_LINK: &str = "INSERT INTO magic_links (token_hash, email, intent, created_at, expires_at, used, used_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)";
    pub const SELECT_ACTIVE_MAGIC_LINK: &str = "SELECT token_hash, email, intent, created_at, expires_at, used, used_at \
         FROM magic_links WHERE email = ? AND used = ? AND expires_at > ? \
         ORDER BY created_at DESC LIMIT 1";
    pub const CONSUME_MAGIC_LINK: &str = "UPDATE magic_links SET used = ?, used_at = ? \
         WHERE token_hash = ? AND used = ? AND expires_at > ?";
    pub const SELECT_MAGIC_LINK: &str = "SELECT token_hash, email, intent, created_at, expires_at, used, used_at \
         FROM magic_links WHERE token_hash = ?";
    pub const PURGE_MAGIC_LINKS: &str = "DELETE FROM magic_links WHERE expires_at <= ?";

    pub const INSERT_SESSION: &str =
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)";
    pub const SELECT_SESSION: &str = "SELECT token_hash, user_id, created_at, expires_at \
         FROM sessions WHERE token_hash = ? AND expires_at > ?";
    pub const DELETE_SESSION: &str = "DELETE FROM sessions WHERE token_hash = ?";
    pub const PURGE_SESSIONS: &str = "DELETE FROM sessions WHERE expires_at <= ?";
}

/// Storage contract shared by every backend.
///
/// Backend failures surface as [`AppError::Database`], never as an empty
/// result, so "store unavailable" cannot be mistaken for "user not found".
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create the schema if it does not exist yet.
    async fn initialize(&self) -> Result<(), AppError>;
    async fn is_healthy(&self) -> bool;
    async fn shutdown(&self);

    // ─── Users ───────────────────────────────────────────────────

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError>;
    /// Lookup is case-insensitive.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    /// Insert a user. If the email is already taken the existing user is returned.
    async fn create_user(&self, user: NewUser) -> Result<User, AppError>;
    async fn update_user_name(&self, user_id: &str, name: &str) -> Result<(), AppError>;
    /// Remove a user with its accounts and sessions. Returns rows deleted.
    async fn delete_user(&self, user_id: &str) -> Result<u64, AppError>;

    // ─── Accounts ────────────────────────────────────────────────

    /// Most recently created account of a user.
    async fn get_account_by_user_id(&self, user_id: &str) -> Result<Option<Account>, AppError>;
    async fn get_accounts_by_user_id(&self, user_id: &str) -> Result<Vec<Account>, AppError>;
    async fn get_account_by_provider(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, AppError>;
    /// Insert an account. On a `(provider_id, provider_account_id)` conflict
    /// the existing account is returned.
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError>;

    // ─── PKCE auth states ────────────────────────────────────────

    /// Insert or replace the verifier stored for `state`.
    async fn save_auth_state(
        &self,
        state: &str,
        code_verifier: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    /// Read without consuming.
    async fn get_auth_state(&self, state: &str) -> Result<AuthStateLookup, AppError>;
    /// Returns `true` only for the caller whose delete removed the row.
    async fn delete_auth_state(&self, state: &str) -> Result<bool, AppError>;
    async fn purge_expired_auth_states(&self) -> Result<u64, AppError>;

    // ─── Magic links ─────────────────────────────────────────────

    /// Store a new link and mark every other active link for the email used.
    async fn insert_magic_link(&self, link: &MagicLink) -> Result<(), AppError>;
    /// Newest unused, unexpired link for the email.
    async fn find_active_magic_link(&self, email: &str) -> Result<Option<MagicLink>, AppError>;
    /// Atomically flip an active link to used. `None` when the link does not
    /// exist, is expired, or was already used.
    async fn consume_magic_link(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MagicLink>, AppError>;
    async fn purge_expired_magic_links(&self) -> Result<u64, AppError>;

    // ─── Sessions ────────────────────────────────────────────────

    async fn create_session(&self, session: &Session) -> Result<(), AppError>;
    /// Only unexpired sessions are returned.
    async fn get_session(&self, token_hash: &str) -> Result<Option<Session>, AppError>;
    async fn delete_session(&self, token_hash: &str) -> Result<bool, AppError>;
    async fn cleanup_expired_sessions(&self) -> Result<u64, AppError>;
}

/// Connect to the configured backend and make sure its schema exists.
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn AuthStore>, AppError> {
    let store: Arc<dyn AuthStore> = match config {
        DbConfig::Sqlite { path } => Arc::new(SqliteStore::new(path).await?),
        DbConfig::Mysql { .. } => Arc::new(MysqlStore::new(config).await?),
    };

    store.initialize().await?;
    tracing::info!(backend = store.backend(), "Auth store ready");
    Ok(store)
}

/// Normalize an email for storage and lookup.
pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
