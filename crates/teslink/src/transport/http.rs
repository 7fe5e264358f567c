// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for telemetry and service status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{ApiError, ErrorBody, ErrorCode};
use crate::state::AppState;
use crate::transport::session::session_cookie;
use crate::vehicle::poller::{PollState, PollStatus};
use crate::vehicle::snapshot::VehicleSnapshot;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    /// No session or no poller yet; the client should visit `/login`.
    NotLoggedIn,
    Idle,
    Polling,
    AuthRequired,
    Failed,
    Stopped,
}

impl From<PollStatus> for DataStatus {
    fn from(status: PollStatus) -> Self {
        match status {
            PollStatus::Idle => Self::Idle,
            PollStatus::Polling => Self::Polling,
            PollStatus::AuthRequired => Self::AuthRequired,
            PollStatus::Failed => Self::Failed,
            PollStatus::Stopped => Self::Stopped,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub status: DataStatus,
    pub vehicle_id: Option<u64>,
    /// False until the first successful poll.
    pub has_data: bool,
    pub snapshot: Option<VehicleSnapshot>,
    /// The snapshot predates at least one failed poll.
    pub stale: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorBody>,
    pub next_poll_in_ms: Option<u64>,
}

impl DataResponse {
    fn not_logged_in() -> Self {
        Self {
            status: DataStatus::NotLoggedIn,
            vehicle_id: None,
            has_data: false,
            snapshot: None,
            stale: false,
            consecutive_failures: 0,
            last_error: None,
            next_poll_in_ms: None,
        }
    }

    fn from_poll(state: PollState) -> Self {
        let now = Instant::now();
        Self {
            status: state.status.into(),
            vehicle_id: state.vehicle_id,
            has_data: state.last_snapshot.is_some(),
            stale: state.is_stale(),
            consecutive_failures: state.consecutive_failures,
            last_error: state
                .last_error
                .as_ref()
                .map(|e| e.failure.code().to_error_body(e.failure.to_string())),
            next_poll_in_ms: state
                .next_poll_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            snapshot: state.last_snapshot,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub queued: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = s.sessions.read().await;
    Json(HealthResponse { status: "running".to_owned(), session_count: sessions.len() })
}

/// `GET /data`: newest snapshot plus poll health for the caller's session.
pub async fn data(State(s): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let cookie = session_cookie(&headers);
    let poll = match s.resolve_session(cookie.as_deref()).await {
        Some(session) => session.poll_state().await,
        None => None,
    };
    Json(poll.map(DataResponse::from_poll).unwrap_or_else(DataResponse::not_logged_in))
}

/// `POST /refresh`: poll now instead of waiting for the next interval.
pub async fn refresh(State(s): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cookie = session_cookie(&headers);
    let Some(session) = s.resolve_session(cookie.as_deref()).await else {
        return ErrorCode::Unauthorized.to_http_response("not logged in").into_response();
    };
    let poller = session.poller.read().await;
    match poller.as_ref().filter(|h| !h.is_finished()) {
        Some(handle) => {
            handle.poll_now();
            (StatusCode::ACCEPTED, Json(RefreshResponse { queued: true })).into_response()
        }
        None => ErrorCode::Unauthorized.to_http_response("no active poller").into_response(),
    }
}

/// `GET /vehicles`: live vehicle list for the caller's session.
pub async fn vehicles(State(s): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cookie = session_cookie(&headers);
    let Some(session) = s.resolve_session(cookie.as_deref()).await else {
        return ErrorCode::Unauthorized.to_http_response("not logged in").into_response();
    };
    let token = match session.tokens.ensure_valid(s.config.refresh_margin()).await {
        Ok(token) => token,
        Err(e) => return e.code().to_http_response(e.to_string()).into_response(),
    };
    match s.vehicles.list_vehicles(&token).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            if e == ApiError::Unauthorized {
                session.tokens.invalidate(&token).await;
            }
            tracing::warn!(session_id = %session.id, err = %e, "vehicle listing failed");
            e.code().to_http_response(e.to_string()).into_response()
        }
    }
}
