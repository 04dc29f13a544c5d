// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Networked MySQL backend.

use crate::config::DbConfig;
use crate::error::AppError;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id VARCHAR(36) NOT NULL PRIMARY KEY,
        email VARCHAR(255) NOT NULL UNIQUE,
        name VARCHAR(255) NULL,
        image TEXT NULL,
        email_verified BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME(6) NOT NULL
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS accounts (
        id VARCHAR(36) NOT NULL PRIMARY KEY,
        user_id VARCHAR(36) NOT NULL,
        provider_id VARCHAR(64) NOT NULL,
        provider_account_id VARCHAR(255) NOT NULL,
        access_token TEXT NULL,
        refresh_token TEXT NULL,
        created_at DATETIME(6) NOT NULL,
        UNIQUE KEY uq_accounts_provider (provider_id, provider_account_id),
        INDEX idx_accounts_user_id (user_id),
        CONSTRAINT fk_accounts_user FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS auth_states (
        state VARCHAR(255) NOT NULL PRIMARY KEY,
        code_verifier VARCHAR(255) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        expires_at DATETIME(6) NOT NULL,
        INDEX idx_auth_states_expires_at (expires_at)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS magic_links (
        token_hash CHAR(64) NOT NULL PRIMARY KEY,
        email VARCHAR(255) NOT NULL,
        intent VARCHAR(16) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        expires_at DATETIME(6) NOT NULL,
        used BOOLEAN NOT NULL DEFAULT FALSE,
        used_at DATETIME(6) NULL,
        INDEX idx_magic_links_email (email, used, expires_at)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS sessions (
        token_hash CHAR(64) NOT NULL PRIMARY KEY,
        user_id VARCHAR(36) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        expires_at DATETIME(6) NOT NULL,
        INDEX idx_sessions_expires_at (expires_at),
        CONSTRAINT fk_sessions_user FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
];

const UPSERT_AUTH_STATE: &str = "INSERT INTO auth_states (state, code_verifier, created_at, expires_at)
     VALUES (?, ?, ?, ?)
     ON DUPLICATE KEY UPDATE
       code_verifier = VALUES(code_verifier),
       created_at = VALUES(created_at),
       expires_at = VALUES(expires_at)";

/// MySQL-backed [`AuthStore`](super::AuthStore).
#[derive(Clone)]
pub struct MysqlStore {
    pool: MySqlPool,
}

impl MysqlStore {
    /// Build a connection pool from a [`DbConfig::Mysql`].
    pub async fn new(config: &DbConfig) -> Result<Self, AppError> {
        let DbConfig::Mysql {
            host,
            port,
            user,
            password,
            database,
            connection_limit,
        } = config
        else {
            return Err(AppError::Config(
                "MySQL store requires a MySQL database configuration".into(),
            ));
        };

        let options = MySqlConnectOptions::new()
            .host(host)
            .port(*port)
            .username(user)
            .password(password)
            .database(database)
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
            .max_connections(*connection_limit)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to MySQL: {}", e)))?;

        tracing::info!(host = %host, port, database = %database, "Connected to MySQL auth store");

        Ok(Self { pool })
    }
}

impl_auth_store! {
    store: MysqlStore,
    backend: "mysql",
    schema: SCHEMA,
    upsert_auth_state: UPSERT_AUTH_STATE,
}
