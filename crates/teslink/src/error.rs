// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Failures of the login flow and token lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Callback `state` was never issued, already consumed, or belongs to another session.
    #[error("unknown or already used authorization state")]
    InvalidState,
    #[error("authorization attempt expired")]
    AttemptExpired,
    #[error("callback is missing the authorization code")]
    MissingCode,
    /// Token endpoint answered with a non-2xx status.
    #[error("token endpoint returned {status}")]
    TokenExchangeFailed { status: u16, body: String },
    /// The refresh token was rejected (`invalid_grant` and friends); a new login is required.
    #[error("refresh token rejected")]
    RefreshRejected,
    #[error("not authenticated")]
    Unauthenticated,
    /// DNS, TLS, timeout or connection failure talking to the token endpoint.
    #[error("network failure: {0}")]
    Network(String),
}

impl AuthError {
    /// Whether a later retry may succeed without user involvement.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::TokenExchangeFailed { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidState => ErrorCode::InvalidState,
            Self::AttemptExpired => ErrorCode::AttemptExpired,
            Self::MissingCode => ErrorCode::MissingCode,
            Self::TokenExchangeFailed { .. } | Self::Network(_) => ErrorCode::UpstreamError,
            Self::RefreshRejected | Self::Unauthenticated => ErrorCode::Unauthorized,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Failures of the vehicle API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// HTTP 401: the token must be refreshed or the user must log in again.
    #[error("vehicle API rejected the access token")]
    Unauthorized,
    #[error("vehicle not found")]
    NotFound,
    #[error("vehicle API returned {0}")]
    UpstreamError(u16),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// 2xx response whose body could not be decoded.
    #[error("malformed vehicle API response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamError(_) | Self::NetworkFailure(_) | Self::Decode(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::NotFound => ErrorCode::NotFound,
            _ => ErrorCode::UpstreamError,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::NetworkFailure(e.to_string())
        }
    }
}

/// What went wrong during one poll.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollFailure {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The account has no vehicles to monitor.
    #[error("no vehicles on the account")]
    NoVehicles,
}

impl PollFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_transient(),
            Self::Api(e) => e.is_transient(),
            Self::NoVehicles => true,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(e) => e.code(),
            Self::Api(e) => e.code(),
            Self::NoVehicles => ErrorCode::NotFound,
        }
    }

    /// Failures after which polling cannot continue without a new login.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Auth(e) if !e.is_transient())
    }
}

/// A poll failure together with the failure streak it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{failure} ({consecutive_failures} consecutive failures)")]
pub struct PollError {
    pub failure: PollFailure,
    pub consecutive_failures: u32,
}

/// Error codes for the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    InvalidState,
    AttemptExpired,
    MissingCode,
    Unauthorized,
    NotFound,
    UpstreamError,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::InvalidState | Self::AttemptExpired | Self::MissingCode => {
                400
            }
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::InvalidState => "INVALID_STATE",
            Self::AttemptExpired => "ATTEMPT_EXPIRED",
            Self::MissingCode => "MISSING_CODE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
