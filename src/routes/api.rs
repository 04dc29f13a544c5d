// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for callers holding a verified bearer token.

use crate::models::Payload;
use crate::AppState;
use axum::{routing::get, Extension, Json, Router};
use std::sync::Arc;

/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/me", get(get_me))
}

/// Claims of the presented token, normalized.
async fn get_me(Extension(payload): Extension<Payload>) -> Json<Payload> {
    Json(payload)
}
