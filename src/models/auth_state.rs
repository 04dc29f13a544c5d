// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! PKCE auth-state lookups.

/// Outcome of looking up a PKCE `state`.
///
/// Expired rows are reported separately from missing ones so the caller can
/// tell the user to retry rather than show a generic error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateLookup {
    /// Found and still valid; carries the code verifier.
    Code(String),
    NotFound,
    Expired,
}

impl AuthStateLookup {
    pub fn code(&self) -> Option<&str> {
        match self {
            AuthStateLookup::Code(code) => Some(code),
            _ => None,
        }
    }
}
