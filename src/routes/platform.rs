// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Platform parameters carried across a multi-hop sign-in and the redirect
//! back to the platform once it completes.

use crate::cookie_policy::{build_cookie, RequestContext, PARAMS_COOKIE};
use crate::error::AppError;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Parameters the platform passes when it sends a user here to sign in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformParams {
    /// Platform-side flow state echoed back with the one-time code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_redirect_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl PlatformParams {
    /// Read from the query string, accepting the spelling variants the
    /// platform has used over time.
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| query.get(*k))
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            state: get(&["state"]),
            redirect_to: get(&["redirect-to", "redirectTo"]),
            app_redirect_to: get(&["app-redirect-to", "appRedirectTo"]),
            source: get(&["source"]),
            client_id: get(&["clientId", "client_id"]),
            code_challenge: get(&["codeChallenge", "codechallenge"]),
            project_id: get(&["projectId"]),
        }
    }

    /// Decode the URL-encoded JSON stored in the params cookie.
    pub fn from_cookie(jar: &CookieJar) -> Option<Self> {
        let raw = jar.get(PARAMS_COOKIE)?.value();
        let decoded = urlencoding::decode(raw).ok()?;
        match serde_json::from_str(&decoded) {
            Ok(params) => Some(params),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed platform params cookie");
                None
            }
        }
    }

    /// Query parameters win when present; otherwise the cookie is used.
    pub fn extract(query: &HashMap<String, String>, jar: &CookieJar) -> Self {
        let from_query = Self::from_query(query);
        if !from_query.is_empty() {
            return from_query;
        }
        Self::from_cookie(jar).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_platform(&self) -> bool {
        self.source.as_deref() == Some("platform")
    }

    /// Params cookie carrying these parameters.
    pub fn to_cookie(&self, ctx: &RequestContext, max_age: Duration) -> Option<Cookie<'static>> {
        let json = serde_json::to_string(self).ok()?;
        Some(build_cookie(
            ctx,
            PARAMS_COOKIE,
            urlencoding::encode(&json).into_owned(),
            Some(max_age),
        ))
    }
}

/// Whether `target` is an absolute URL whose origin is allowed.
pub fn is_allowed_redirect(target: &str, allowed_origins: &[String]) -> bool {
    let Ok(url) = Url::parse(target) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let origin = url.origin().ascii_serialization();
    allowed_origins
        .iter()
        .any(|allowed| allowed.trim_end_matches('/') == origin)
}

/// Platform URL that receives the one-time code.
///
/// `redirect-to`/`app-redirect-to` are only forwarded when their origin is
/// in `allowed_origins` or equals the platform's own origin.
pub fn build_platform_redirect_url(
    base_url: &str,
    code: &str,
    state: &str,
    params: &PlatformParams,
    allowed_origins: &[String],
) -> Result<String, AppError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| AppError::Config(format!("invalid platform URL {base_url}: {e}")))?;

    let mut allowed = allowed_origins.to_vec();
    allowed.push(url.origin().ascii_serialization());

    let checked = |target: &Option<String>| -> Option<String> {
        let target = target.as_deref()?;
        if is_allowed_redirect(target, &allowed) {
            Some(target.to_string())
        } else {
            tracing::warn!(redirect = %target, "Dropping redirect outside allowed origins");
            None
        }
    };

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        query.append_pair("state", state);
        if let Some(target) = checked(&params.redirect_to) {
            query.append_pair("redirect-to", &target);
        }
        if let Some(target) = checked(&params.app_redirect_to) {
            query.append_pair("app-redirect-to", &target);
        }
        for (key, value) in [
            ("source", &params.source),
            ("clientId", &params.client_id),
            ("codeChallenge", &params.code_challenge),
            ("projectId", &params.project_id),
        ] {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_spelling_variants() {
        let params = PlatformParams::from_query(&query(&[
            ("redirectTo", "https://platform.test/a"),
            ("codechallenge", "xyz"),
            ("source", "platform"),
            ("state", "s1"),
        ]));

        assert_eq!(params.redirect_to.as_deref(), Some("https://platform.test/a"));
        assert_eq!(params.code_challenge.as_deref(), Some("xyz"));
        assert!(params.is_platform());
        assert_eq!(params.state.as_deref(), Some("s1"));
    }

    #[test]
    fn cookie_round_trip() {
        let params = PlatformParams {
            state: Some("s".into()),
            source: Some("platform".into()),
            client_id: Some("c".into()),
            ..Default::default()
        };
        let ctx = RequestContext::new("http", "localhost");
        let cookie = params.to_cookie(&ctx, Duration::from_secs(60)).unwrap();
        let jar = CookieJar::new().add(cookie);

        assert_eq!(PlatformParams::from_cookie(&jar), Some(params.clone()));
        assert_eq!(PlatformParams::extract(&HashMap::new(), &jar), params);
    }

    #[test]
    fn redirect_url_filters_foreign_origins() {
        let params = PlatformParams {
            redirect_to: Some("https://evil.test/steal".into()),
            app_redirect_to: Some("https://app.test/home".into()),
            source: Some("platform".into()),
            ..Default::default()
        };

        let url = build_platform_redirect_url(
            "https://platform.test/auth/sign-in",
            "c0de",
            "st",
            &params,
            &["https://app.test".to_string()],
        )
        .unwrap();

        assert!(url.starts_with("https://platform.test/auth/sign-in?code=c0de&state=st"));
        assert!(!url.contains("evil.test"));
        assert!(url.contains("app-redirect-to=https%3A%2F%2Fapp.test%2Fhome"));
        assert!(url.contains("source=platform"));
    }

    #[test]
    fn platform_origin_is_implicitly_allowed() {
        let params = PlatformParams {
            redirect_to: Some("https://platform.test/projects/1".into()),
            ..Default::default()
        };
        let url =
            build_platform_redirect_url("https://platform.test/in", "c", "s", &params, &[])
                .unwrap();
        assert!(url.contains("redirect-to=https%3A%2F%2Fplatform.test%2Fprojects%2F1"));
    }

    #[test]
    fn non_http_targets_rejected() {
        let allowed = vec!["https://platform.test".to_string()];
        assert!(!is_allowed_redirect("javascript:alert(1)", &allowed));
        assert!(!is_allowed_redirect("/relative", &allowed));
        assert!(is_allowed_redirect("https://platform.test/x", &allowed));
    }
}
