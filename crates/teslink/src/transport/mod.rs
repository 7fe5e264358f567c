// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the telemetry gateway.

pub mod http;
pub mod login;
pub mod session;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(http::health))
        // Login flow
        .route("/login", get(login::login))
        .route("/callback", get(login::callback))
        .route("/logout", post(login::logout))
        // Telemetry
        .route("/data", get(http::data))
        .route("/refresh", post(http::refresh))
        .route("/vehicles", get(http::vehicles))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
