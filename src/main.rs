// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! idgate API server
//!
//! Authenticates platform users and hands verified identities back to the
//! platform.

use idgate::{
    config::Config,
    db,
    services::{
        auth_flow::{CachingIdTokenSource, IamIdTokenMinter},
        HttpKeySetFetcher, IdTokenSource, LogMailer, Mailer, WebhookMailer,
    },
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const JANITOR_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured JSON logging
    init_logging()?;

    // Missing provider secrets and malformed settings fail here, not per request
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting idgate");

    let store = db::connect(&config.db).await?;

    let key_fetcher = Arc::new(HttpKeySetFetcher::new(
        config.jwt.jwks_url.clone(),
        config.http_timeout,
    )?);

    let mailer: Arc<dyn Mailer> = match &config.mail_webhook_url {
        Some(url) => {
            tracing::info!("Magic links delivered through mail webhook");
            Arc::new(WebhookMailer::new(url.clone(), config.http_timeout)?)
        }
        None => {
            tracing::warn!("MAIL_WEBHOOK_URL not set, magic links will only be logged");
            Arc::new(LogMailer)
        }
    };

    let id_tokens: Option<Arc<dyn IdTokenSource>> = match (
        &config.auth_flow.service_account_email,
        &config.auth_flow.target_audience,
    ) {
        (Some(email), Some(audience)) => {
            let minter = IamIdTokenMinter::from_default_credentials(
                email.clone(),
                audience.clone(),
                config.http_timeout,
            )
            .await?;
            Some(Arc::new(CachingIdTokenSource::new(Arc::new(minter))))
        }
        _ => {
            tracing::warn!("Service account not configured, platform hand-off disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        store.clone(),
        key_fetcher,
        mailer,
        id_tokens,
    )?);

    let janitor = tokio::spawn(run_janitor(state.clone()));

    let app = idgate::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    janitor.abort();
    store.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically delete expired auth states, magic links and sessions.
async fn run_janitor(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(JANITOR_INTERVAL);
    loop {
        interval.tick().await;
        match state.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Purged expired auth records"),
            Err(e) => tracing::warn!(error = %e, "Purging expired auth records failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("idgate=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
