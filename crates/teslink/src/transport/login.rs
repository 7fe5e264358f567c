// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login flow handlers: `/login`, `/callback`, `/logout`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ErrorCode};
use crate::state::AppState;
use crate::transport::session::{
    clear_session_cookie, new_session_id, session_cookie, set_session_cookie,
};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the authorization server when the user denied or the request was invalid.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => ErrorCode::Internal.to_http_response("invalid redirect target").into_response(),
    }
}

fn auth_error(e: &AuthError) -> Response {
    e.code().to_http_response(e.to_string()).into_response()
}

/// `GET /login`: start an authorization attempt and redirect to the provider.
pub async fn login(State(s): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let known = match session_cookie(&headers) {
        Some(id) if s.session(&id).await.is_some() => Some(id),
        _ => None,
    };
    let is_new = known.is_none();
    let session_id = known.unwrap_or_else(new_session_id);

    s.prune_idle_sessions().await;
    s.get_or_create_session(&session_id).await;
    let attempt = s.attempts.begin(&session_id).await;
    let url = s.oauth_config.authorize_url_for(&attempt.code_challenge, &attempt.state);
    tracing::info!(session_id = %session_id, "login started");

    let mut resp = redirect(&url);
    if is_new {
        set_session_cookie(resp.headers_mut(), &session_id);
    }
    resp
}

/// `GET /callback`: validate state, redeem the code, start polling.
pub async fn callback(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<CallbackQuery>,
) -> Response {
    let Some(session_id) = session_cookie(&headers) else {
        tracing::warn!("callback without session cookie");
        return auth_error(&AuthError::InvalidState);
    };

    if let Some(err) = q.error.as_deref() {
        s.attempts.cancel(&session_id).await;
        let detail = q.error_description.as_deref().unwrap_or(err);
        tracing::warn!(session_id = %session_id, error = err, "authorization denied");
        return ErrorCode::BadRequest
            .to_http_response(format!("authorization failed: {detail}"))
            .into_response();
    }

    let Some(state) = q.state.as_deref().filter(|st| !st.is_empty()) else {
        return auth_error(&AuthError::InvalidState);
    };
    let attempt = match s.attempts.consume(&session_id, state).await {
        Ok(attempt) => attempt,
        Err(e) => {
            tracing::warn!(session_id = %session_id, err = %e, "callback rejected");
            return auth_error(&e);
        }
    };
    let Some(code) = q.code.as_deref().filter(|c| !c.is_empty()) else {
        return auth_error(&AuthError::MissingCode);
    };

    let tokens = match s.oauth.exchange_code(code, &attempt.code_verifier).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(session_id = %session_id, err = %e, "code exchange failed");
            return auth_error(&e);
        }
    };

    let session = s.get_or_create_session(&session_id).await;
    session.tokens.set(tokens).await;
    s.start_polling(&session).await;
    tracing::info!(session_id = %session_id, "login completed");

    redirect(&s.config.landing_path)
}

/// `POST /logout`: drop the session, its tokens and its poller.
pub async fn logout(State(s): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let logged_out = match session_cookie(&headers) {
        Some(id) => s.remove_session(&id).await,
        None => false,
    };
    let mut resp = Json(LogoutResponse { logged_out }).into_response();
    clear_session_cookie(resp.headers_mut());
    resp
}
