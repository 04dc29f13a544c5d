// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-in, sign-up, sign-out, magic-link and social OAuth routes.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::platform::{build_platform_redirect_url, PlatformParams};
use crate::cookie_policy::{
    build_cookie, clear_cookie, RequestContext, PARAMS_COOKIE, SESSION_COOKIE, STATE_COOKIE,
};
use crate::error::{AppError, Result};
use crate::models::MagicLinkIntent;
use crate::services::email::parse_email;
use crate::services::{
    AuthFlowRequest, MagicLinkDelivery, SocialProvider, UserAccountPair, UserInfo,
};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/sign-in", get(sign_in))
        .route("/auth/sign-up", get(sign_up))
        .route("/auth/sign-out", get(sign_out))
        .route("/auth/magic-link", post(request_magic_link))
        .route("/auth/magic-link/verify", get(verify_magic_link))
        .route("/auth/social/{provider}", get(social_start))
        .route("/auth/social/{provider}/callback", get(social_callback))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    SignIn,
    SignUp,
}

impl Page {
    fn as_str(self) -> &'static str {
        match self {
            Page::SignIn => "sign-in",
            Page::SignUp => "sign-up",
        }
    }
}

/// What a sign-in or sign-up page needs to render.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPageResponse {
    pub page: &'static str,
    pub providers: Vec<&'static str>,
    pub magic_link: bool,
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    auth_page(state, Page::SignIn, query, headers, jar).await
}

async fn sign_up(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    auth_page(state, Page::SignUp, query, headers, jar).await
}

/// Entry point for a platform-initiated flow.
///
/// Without a platform `state` the user is sent back to the platform to start
/// one. A user who already has a session is handed off immediately.
/// Otherwise the parameters are kept in a cookie for the hops that follow.
async fn auth_page(
    state: Arc<AppState>,
    page: Page,
    query: HashMap<String, String>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    let ctx = RequestContext::from_headers(&headers);
    let params = PlatformParams::from_query(&query);

    if params.state.is_none() {
        let platform_url = match page {
            Page::SignIn => &state.config.platform_sign_in_url,
            Page::SignUp => &state.config.platform_sign_up_url,
        };
        tracing::debug!(page = page.as_str(), "No platform state, redirecting to platform");
        return Ok(Redirect::temporary(platform_url).into_response());
    }

    if params.is_platform() {
        if let Some(pair) = session_identity(&state, &jar).await? {
            tracing::info!(user_id = %pair.user.id, "Existing session, completing platform flow");
            let target = hand_off(&state, &pair, &params).await?;
            let jar = jar.add(clear_cookie(&ctx, PARAMS_COOKIE));
            return Ok((jar, Redirect::temporary(&target)).into_response());
        }
    }

    let jar = match params.to_cookie(&ctx, state.config.auth_state_ttl) {
        Some(cookie) => jar.add(cookie),
        None => jar,
    };

    let body = AuthPageResponse {
        page: page.as_str(),
        providers: state.social.enabled().into_iter().map(|p| p.id()).collect(),
        magic_link: true,
    };

    Ok((jar, Json(body)).into_response())
}

/// End the session and drop every flow cookie.
async fn sign_out(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let ctx = RequestContext::from_headers(&headers);

    if let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        if !token.is_empty() && state.sessions.revoke(&token).await? {
            tracing::info!("Session revoked");
        }
    }

    let jar = jar
        .add(clear_cookie(&ctx, SESSION_COOKIE))
        .add(clear_cookie(&ctx, PARAMS_COOKIE))
        .add(clear_cookie(&ctx, STATE_COOKIE));

    let target = state
        .config
        .sign_out_redirect_url
        .clone()
        .unwrap_or_else(|| "/auth/sign-in".to_string());

    Ok((jar, Redirect::temporary(&target)))
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
    #[serde(default)]
    pub intent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MagicLinkAccepted {
    pub status: &'static str,
}

/// Send a magic link. Suppressed sends answer exactly like real ones.
async fn request_magic_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MagicLinkRequest>,
) -> Result<(StatusCode, Json<MagicLinkAccepted>)> {
    let email = parse_email(&request.email)?;
    let intent = match request.intent.as_deref() {
        None => MagicLinkIntent::Signup,
        Some(raw) => MagicLinkIntent::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown intent {raw}")))?,
    };

    match state.magic_links.request(&email, intent).await? {
        MagicLinkDelivery::Sent { .. } | MagicLinkDelivery::Suppressed => Ok((
            StatusCode::ACCEPTED,
            Json(MagicLinkAccepted { status: "sent" }),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    token: String,
}

/// Redeem a magic link, start a session and continue the platform flow.
async fn verify_magic_link(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    let verification = state.magic_links.verify(&params.token).await?;

    let email = match verification.email.clone() {
        Some(email) if verification.valid => email,
        _ => return Ok((StatusCode::UNAUTHORIZED, Json(verification)).into_response()),
    };

    let pair = state.accounts.resolve_credential(&email).await?;
    let ctx = RequestContext::from_headers(&headers);
    Ok(finish_sign_in(&state, &ctx, jar, &pair).await?.into_response())
}

/// Redirect to the provider with a fresh PKCE challenge.
async fn social_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let provider = enabled_provider(&state, &provider)?;
    let ctx = RequestContext::from_headers(&headers);

    let challenge = state.pkce.begin().await?;
    let url = state
        .social
        .authorize_url(provider, &challenge.state, &challenge.code_challenge)?;

    let mut jar = jar.add(build_cookie(
        &ctx,
        STATE_COOKIE,
        challenge.state.clone(),
        Some(state.config.auth_state_ttl),
    ));

    let params = PlatformParams::from_query(&query);
    if !params.is_empty() {
        if let Some(cookie) = params.to_cookie(&ctx, state.config.auth_state_ttl) {
            jar = jar.add(cookie);
        }
    }

    tracing::info!(provider = %provider, "Starting social sign-in");
    Ok((jar, Redirect::temporary(&url)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Provider callback: bind to the browser, redeem the PKCE state, exchange
/// the code and resolve the local user.
async fn social_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response> {
    let provider = enabled_provider(&state, &provider)?;
    let ctx = RequestContext::from_headers(&headers);

    if let Some(error) = params.error {
        return Err(AppError::Unauthorized(format!(
            "{provider} returned error: {error}"
        )));
    }

    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Err(AppError::BadRequest("missing code or state".to_string()));
    };

    let cookie_state = jar
        .get(STATE_COOKIE)
        .map(|c| c.value().to_string())
        .unwrap_or_default();
    if cookie_state.is_empty()
        || !bool::from(cookie_state.as_bytes().ct_eq(oauth_state.as_bytes()))
    {
        return Err(AppError::Unauthorized(
            "state does not match this browser".to_string(),
        ));
    }

    let code_verifier = state.pkce.consume(&oauth_state).await?;
    let (profile, tokens) = state.social.complete(provider, &code, &code_verifier).await?;
    let pair = state
        .accounts
        .resolve_social(provider, &profile, Some(&tokens))
        .await?;

    let jar = jar.add(clear_cookie(&ctx, STATE_COOKIE));
    Ok(finish_sign_in(&state, &ctx, jar, &pair).await?.into_response())
}

fn enabled_provider(state: &AppState, id: &str) -> Result<SocialProvider> {
    SocialProvider::from_id(id)
        .filter(|p| state.social.is_enabled(*p))
        .ok_or_else(|| AppError::NotFound(format!("provider {id}")))
}

/// Start a session for `pair` and continue where the platform left off.
async fn finish_sign_in(
    state: &AppState,
    ctx: &RequestContext,
    jar: CookieJar,
    pair: &UserAccountPair,
) -> Result<(CookieJar, Redirect)> {
    let params = PlatformParams::from_cookie(&jar).unwrap_or_default();

    let target = hand_off(state, pair, &params).await?;
    let token = state.sessions.create(&pair.user.id).await?;

    let jar = jar
        .add(build_cookie(
            ctx,
            SESSION_COOKIE,
            token,
            Some(state.sessions.ttl()),
        ))
        .add(clear_cookie(ctx, PARAMS_COOKIE));

    tracing::info!(
        user_id = %pair.user.id,
        provider = %pair.account.provider_id,
        "Sign-in complete"
    );
    Ok((jar, Redirect::temporary(&target)))
}

/// Exchange the identity for a platform code when a platform flow is in
/// progress; otherwise send the user to the platform to start one.
async fn hand_off(
    state: &AppState,
    pair: &UserAccountPair,
    params: &PlatformParams,
) -> Result<String> {
    let Some(flow_state) = params.state.as_deref() else {
        return Ok(state.config.platform_sign_in_url.clone());
    };

    let code = state
        .auth_flow
        .complete_auth_flow(&AuthFlowRequest {
            state: flow_state.to_string(),
            user_info: UserInfo::from_pair(pair),
        })
        .await?;

    build_platform_redirect_url(
        &state.config.platform_sign_in_url,
        &code.code,
        flow_state,
        params,
        &state.config.allowed_redirect_origins,
    )
}

/// User and account behind the session cookie, if any.
async fn session_identity(state: &AppState, jar: &CookieJar) -> Result<Option<UserAccountPair>> {
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value()) else {
        return Ok(None);
    };
    if token.is_empty() {
        return Ok(None);
    }

    let Some(user) = state.sessions.resolve(token).await? else {
        return Ok(None);
    };
    state.accounts.resolve_by_user_id(&user.id).await
}
