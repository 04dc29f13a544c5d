// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Email address and display-name helpers.

use crate::error::AppError;
use validator::ValidateEmail;

const MAX_EMAIL_LEN: usize = 254;

/// First/last/full name triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize and validate an address supplied by a client.
pub fn parse_email(raw: &str) -> Result<String, AppError> {
    let email = normalize_email(raw);

    if email.is_empty() {
        return Err(AppError::BadRequest("Email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(AppError::BadRequest("Email is too long".to_string()));
    }
    if !email.validate_email() {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }

    Ok(email)
}

/// Split a display name on whitespace: the first word is the first name and
/// the rest the last name.
pub fn split_name(name: Option<&str>) -> NameParts {
    let Some(full) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return NameParts::default();
    };

    let full = full.split_whitespace().collect::<Vec<_>>().join(" ");
    let (first, last) = match full.split_once(' ') {
        Some((first, last)) => (first.to_string(), Some(last.to_string())),
        None => (full.clone(), None),
    };

    NameParts {
        first_name: Some(first),
        last_name: last,
        full_name: Some(full),
    }
}

/// Best-effort display name from the local part of an address:
/// `jane.doe+news@x.com` becomes `Jane Doe`.
pub fn generate_name_from_email(email: &str) -> Option<String> {
    let local = email.trim().split('@').next()?;
    let local = local.split('+').next().unwrap_or(local);

    let words: Vec<String> = local
        .split(['.', '_', '-'])
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Provided name if non-blank, otherwise one derived from the email.
pub fn resolve_name_with_fallback(name: Option<&str>, email: &str) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| generate_name_from_email(email))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
