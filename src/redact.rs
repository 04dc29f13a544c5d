// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Masking of secrets before they reach a log line.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments (lowercase, separators stripped) that mark a value secret.
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "state",
    "cookie",
    "code",
    "codeverifier",
    "codechallenge",
    "password",
    "secret",
    "authorization",
    "apikey",
    "clientsecret",
    "privatekey",
    "session",
];

/// Whether a field name denotes a secret. `accessToken`, `refresh_token`
/// and `X-Api-Key` all match.
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    SENSITIVE_KEYS
        .iter()
        .any(|fragment| normalized == *fragment || normalized.ends_with(fragment))
}

/// Recursively mask every value stored under a sensitive key.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive_key(&key) && !value.is_null() {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_value(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

/// Mask the values of sensitive query parameters, leaving the rest intact.
pub fn redact_url(url: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };

    let Some((path, query)) = base.split_once('?') else {
        return url.to_string();
    };

    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_sensitive_key(&decode(key)) => format!("{key}={REDACTED}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");

    match fragment {
        Some(fragment) => format!("{path}?{query}#{fragment}"),
        None => format!("{path}?{query}"),
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_values_are_masked() {
        let redacted = redact_value(json!({
            "email": "a@b.com",
            "state": "abc",
            "nested": { "accessToken": "t", "items": [{ "refresh_token": "r" }] },
            "codeVerifier": null,
        }));

        assert_eq!(
            redacted,
            json!({
                "email": "a@b.com",
                "state": REDACTED,
                "nested": { "accessToken": REDACTED, "items": [{ "refresh_token": REDACTED }] },
                "codeVerifier": null,
            })
        );
    }

    #[test]
    fn url_query_is_masked() {
        assert_eq!(
            redact_url("https://x.test/cb?code=abc&state=s&source=web#top"),
            format!("https://x.test/cb?code={REDACTED}&state={REDACTED}&source=web#top")
        );
        assert_eq!(redact_url("https://x.test/plain"), "https://x.test/plain");
    }

    #[test]
    fn ordinary_keys_pass_through() {
        assert!(!is_sensitive_key("email"));
        assert!(!is_sensitive_key("redirectTo"));
        assert!(is_sensitive_key("X-Api-Key"));
        assert!(is_sensitive_key("id_token"));
    }
}
