// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User and provider-account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider id used for accounts created by the email (magic-link) flow.
pub const CREDENTIAL_PROVIDER_ID: &str = "credential";

/// A platform user, keyed by a case-normalized email address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Always stored trimmed and lowercase
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Binding between a user and one identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: String,
    /// e.g. `google`, `microsoft`, `credential`
    pub provider_id: String,
    pub provider_account_id: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
}

/// Fields needed to bind an account to an existing user.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub provider_id: String,
    pub provider_account_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}
