// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Teslink: vehicle telemetry gateway with OAuth2 PKCE login.

pub mod auth;
pub mod config;
pub mod error;
pub mod state;
pub mod test_support;
pub mod transport;
pub mod vehicle;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::oauth::HttpOAuthClient;
use crate::config::Config;
use crate::state::AppState;
use crate::transport::build_router;
use crate::vehicle::client::HttpVehicleApi;

/// Shared outbound client for the token endpoint and the vehicle API.
pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("teslink/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Run the gateway until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    config.validate()?;
    let addr = format!("{}:{}", config.host, config.port);

    let http = build_http_client(config.http_timeout())?;
    let oauth = Arc::new(HttpOAuthClient::new(config.oauth_config(), http.clone()));
    let vehicles = Arc::new(HttpVehicleApi::new(config.api_base.clone(), http));
    let state = Arc::new(AppState::new(config, oauth, vehicles, shutdown.clone()));
    state.bootstrap().await?;

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("teslink listening on {addr}");
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    state.shutdown_pollers().await;
    tracing::info!("teslink stopped");
    Ok(())
}
