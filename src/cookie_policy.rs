// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cookie attributes for every cookie this service sets or clears.
//!
//! All cookies are built here so the `Secure` decision is made in one place.

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, SameSite};
use std::time::Duration;

/// PKCE `state` of an in-flight social sign-in.
pub const STATE_COOKIE: &str = "idgate-state";
/// Serialized platform redirect parameters during a multi-hop sign-in.
pub const PARAMS_COOKIE: &str = "idgate-params";
/// Reference token of an authenticated session.
pub const SESSION_COOKIE: &str = "idgate-session";

/// Protocol and host the client used, as seen through any proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub protocol: String,
    pub host: String,
}

impl RequestContext {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
        }
    }

    /// Derive from `X-Forwarded-Proto`/`X-Forwarded-Host`, falling back to
    /// `Host` and plain HTTP.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let first = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let protocol = first("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
        let host = first("x-forwarded-host")
            .or_else(|| first(header::HOST.as_str()))
            .unwrap_or_else(|| "localhost".to_string());

        Self { protocol, host }
    }

    pub fn is_secure(&self) -> bool {
        is_secure_context(&self.protocol, &self.host)
    }
}

/// Secure only over HTTPS to a non-loopback host.
pub fn is_secure_context(protocol: &str, host: &str) -> bool {
    let protocol = protocol.trim().trim_end_matches(':').to_ascii_lowercase();
    protocol == "https" && !is_loopback_host(host)
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    let hostname = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or_default(),
        None if host.matches(':').count() > 1 => host.as_str(),
        None => host.split(':').next().unwrap_or_default(),
    };

    matches!(hostname, "localhost" | "127.0.0.1" | "::1")
}

/// Attributes shared by every cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub same_site: SameSite,
    pub path: &'static str,
    pub secure: bool,
    pub max_age: Option<Duration>,
}

pub fn build_cookie_options(ctx: &RequestContext, max_age: Option<Duration>) -> CookieOptions {
    CookieOptions {
        http_only: true,
        same_site: SameSite::Lax,
        path: "/",
        secure: ctx.is_secure(),
        max_age,
    }
}

/// A cookie carrying `value` with the policy attributes applied.
pub fn build_cookie(
    ctx: &RequestContext,
    name: &'static str,
    value: impl Into<String>,
    max_age: Option<Duration>,
) -> Cookie<'static> {
    let options = build_cookie_options(ctx, max_age);
    let mut builder = Cookie::build((name, value.into()))
        .http_only(options.http_only)
        .same_site(options.same_site)
        .path(options.path)
        .secure(options.secure);

    if let Some(max_age) = options.max_age {
        builder = builder.max_age(time::Duration::seconds(
            i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX),
        ));
    }

    builder.build()
}

/// An already-expired cookie that makes the browser drop `name`.
pub fn clear_cookie(ctx: &RequestContext, name: &'static str) -> Cookie<'static> {
    build_cookie(ctx, name, "", Some(Duration::ZERO))
}
