// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Magic-link records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a magic link was requested. Only selects the email template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagicLinkIntent {
    Signup,
    Reset,
}

impl MagicLinkIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MagicLinkIntent::Signup => "signup",
            MagicLinkIntent::Reset => "reset",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "signup" => Some(MagicLinkIntent::Signup),
            "reset" => Some(MagicLinkIntent::Reset),
            _ => None,
        }
    }
}

/// A stored magic link. Only the SHA-256 digest of the token is persisted.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MagicLink {
    pub token_hash: String,
    pub email: String,
    pub intent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl MagicLink {
    /// Unused and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}
