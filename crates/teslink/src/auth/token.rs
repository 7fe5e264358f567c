// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session token set with single-flight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::auth::oauth::{OAuthApi, TokenResponse};
use crate::auth::persist::{PersistedTokens, TokenFile};
use crate::error::AuthError;

/// Access/refresh token pair with its lifetime.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub obtained_at: Instant,
    /// `None` when the issuer did not say; such tokens are used until the API rejects them.
    pub expires_in: Option<Duration>,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            obtained_at: Instant::now(),
            expires_in,
        }
    }

    pub fn from_response(resp: TokenResponse) -> Self {
        Self::new(resp.access_token, resp.refresh_token, resp.expires_in.map(Duration::from_secs))
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_in.map(|d| self.obtained_at + d)
    }

    /// Usable at `now` without refreshing, keeping `margin` in reserve.
    ///
    /// The reserve never exceeds half the lifetime, so a token issued with less than
    /// `margin` to live is still used for a while instead of refreshed on every call.
    pub fn is_fresh_at(&self, now: Instant, margin: Duration) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_in {
            Some(lifetime) => now + margin.min(lifetime / 2) < self.obtained_at + lifetime,
            None => true,
        }
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Holds the token set of one authenticated session.
///
/// [`TokenStore::ensure_valid`] refreshes near expiry with at most one refresh in flight;
/// callers that arrive while it runs wait on the gate and reuse its outcome.
pub struct TokenStore {
    session_id: String,
    oauth: Arc<dyn OAuthApi>,
    tokens: RwLock<Option<TokenSet>>,
    /// Serializes refreshes and remembers the outcome of the latest one.
    refresh_gate: Mutex<Option<Result<String, AuthError>>>,
    /// Bumped after every completed refresh.
    refresh_epoch: AtomicU64,
    token_file: Option<Arc<TokenFile>>,
}

impl TokenStore {
    pub fn new(session_id: impl Into<String>, oauth: Arc<dyn OAuthApi>) -> Self {
        Self {
            session_id: session_id.into(),
            oauth,
            tokens: RwLock::new(None),
            refresh_gate: Mutex::new(None),
            refresh_epoch: AtomicU64::new(0),
            token_file: None,
        }
    }

    /// Mirror every change of the token set into the shared `file`.
    pub fn with_persistence(mut self, file: Option<Arc<TokenFile>>) -> Self {
        self.token_file = file;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replace the token set (after a login or a restore).
    pub async fn set(&self, tokens: TokenSet) {
        let mut current = self.tokens.write().await;
        self.persist(Some(&tokens)).await;
        *current = Some(tokens);
    }

    /// Destroy the token set (logout or a dead refresh token).
    pub async fn clear(&self) {
        let mut current = self.tokens.write().await;
        if current.take().is_some() {
            self.persist(None).await;
        }
    }

    pub async fn current(&self) -> Option<TokenSet> {
        self.tokens.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    /// Mark `rejected_access_token` as unusable so the next [`ensure_valid`] refreshes.
    ///
    /// A no-op when the store already holds a different token.
    ///
    /// [`ensure_valid`]: Self::ensure_valid
    pub async fn invalidate(&self, rejected_access_token: &str) {
        let mut current = self.tokens.write().await;
        if let Some(tokens) = current.as_mut() {
            if tokens.access_token == rejected_access_token {
                tokens.expires_in = Some(Duration::ZERO);
            }
        }
    }

    /// Current access token, refreshed first when it expires within `margin`.
    pub async fn ensure_valid(&self, margin: Duration) -> Result<String, AuthError> {
        let seen = self.refresh_epoch.load(Ordering::Acquire);
        if let Some(token) = self.fresh_access_token(margin).await {
            return Ok(token);
        }

        let mut gate = self.refresh_gate.lock().await;
        if let Some(token) = self.fresh_access_token(margin).await {
            return Ok(token);
        }
        if self.refresh_epoch.load(Ordering::Acquire) != seen {
            // A refresh finished while we waited; its failure is ours too.
            if let Some(Err(e)) = gate.as_ref() {
                return Err(e.clone());
            }
        }

        let outcome = self.refresh_now().await;
        *gate = Some(outcome.clone());
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fresh_access_token(&self, margin: Duration) -> Option<String> {
        let now = Instant::now();
        self.tokens
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_fresh_at(now, margin))
            .map(|t| t.access_token.clone())
    }

    async fn refresh_now(&self) -> Result<String, AuthError> {
        let refresh_token = {
            let current = self.tokens.read().await;
            match current.as_ref() {
                None => return Err(AuthError::Unauthenticated),
                Some(t) => t.refresh_token.clone(),
            }
        };
        let Some(refresh_token) = refresh_token else {
            tracing::info!(
                session_id = %self.session_id,
                "access token expired and no refresh token"
            );
            self.clear().await;
            return Err(AuthError::Unauthenticated);
        };

        match self.oauth.refresh(&refresh_token).await {
            Ok(mut fresh) => {
                if fresh.access_token.is_empty() {
                    return Err(AuthError::TokenExchangeFailed {
                        status: 200,
                        body: "empty access_token".to_owned(),
                    });
                }
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token.clone());
                }
                let access_token = fresh.access_token.clone();
                if self.replace_if_current(&refresh_token, Some(fresh)).await {
                    tracing::info!(session_id = %self.session_id, "tokens refreshed");
                    Ok(access_token)
                } else {
                    // Replaced by a login or logout while the refresh was in flight.
                    self.fresh_access_token(Duration::ZERO).await.ok_or(AuthError::Unauthenticated)
                }
            }
            Err(AuthError::RefreshRejected) => {
                tracing::warn!(session_id = %self.session_id, "refresh rejected, login required");
                self.replace_if_current(&refresh_token, None).await;
                Err(AuthError::Unauthenticated)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, err = %e, "token refresh failed");
                Err(e)
            }
        }
    }

    /// Swap the token set only if it still carries `refresh_token`.
    async fn replace_if_current(&self, refresh_token: &str, next: Option<TokenSet>) -> bool {
        let mut current = self.tokens.write().await;
        let still_current = current
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
            .is_some_and(|rt| rt == refresh_token);
        if still_current {
            self.persist(next.as_ref()).await;
            *current = next;
        }
        still_current
    }

    async fn persist(&self, tokens: Option<&TokenSet>) {
        let Some(file) = self.token_file.as_ref() else {
            return;
        };
        let result = match tokens {
            Some(t) => file.store(&self.session_id, PersistedTokens::from_token_set(t)).await,
            None => file.forget(&self.session_id).await,
        };
        if let Err(e) = result {
            tracing::warn!(session_id = %self.session_id, err = %e, "failed to persist tokens");
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
