// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! idgate: identity gateway for a multi-tenant data platform
//!
//! Signs users in with social OAuth (PKCE) or email magic links, keeps the
//! resulting users and accounts in SQLite or MySQL, verifies platform bearer
//! tokens against a cached remote key set, and hands verified identities back
//! to the platform as one-time codes.

pub mod config;
pub mod cookie_policy;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redact;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::AuthStore;
use services::{
    AccountResolver, AuthFlowClient, IdTokenSource, KeySetCache, KeySetFetcher, MagicLinkService,
    Mailer, PkceStore, SessionService, SocialAuth, TokenVerifier,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AuthStore>,
    pub token_verifier: TokenVerifier,
    pub pkce: PkceStore,
    pub magic_links: MagicLinkService,
    pub sessions: SessionService,
    pub accounts: AccountResolver,
    pub social: SocialAuth,
    pub auth_flow: AuthFlowClient,
}

impl AppState {
    /// Wire every service to the given store and outbound dependencies.
    pub fn new(
        config: Config,
        store: Arc<dyn AuthStore>,
        key_fetcher: Arc<dyn KeySetFetcher>,
        mailer: Arc<dyn Mailer>,
        id_tokens: Option<Arc<dyn IdTokenSource>>,
    ) -> anyhow::Result<Self> {
        let keys = Arc::new(KeySetCache::new(key_fetcher));

        Ok(Self {
            token_verifier: TokenVerifier::new(&config.jwt, keys),
            pkce: PkceStore::new(store.clone(), config.auth_state_ttl),
            magic_links: MagicLinkService::new(
                store.clone(),
                mailer,
                &config.base_url,
                config.magic_link_ttl,
                config.magic_link_resend_cooldown,
            ),
            sessions: SessionService::new(store.clone(), config.session_ttl),
            accounts: AccountResolver::new(store.clone()),
            social: SocialAuth::new(&config)?,
            auth_flow: AuthFlowClient::new(&config.auth_flow, config.http_timeout, id_tokens)?,
            store,
            config,
        })
    }

    /// Delete expired auth states, magic links and sessions.
    ///
    /// Each purge runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn purge_expired(&self) -> Result<u64, error::AppError> {
        let results = [
            self.pkce.purge_expired().await,
            self.magic_links.purge_expired().await,
            self.sessions.cleanup_expired().await,
        ];

        let mut total = 0;
        for result in results {
            total += result?;
        }
        Ok(total)
    }
}
