// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending login attempts, one per client session.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::auth::pkce::{self, PkcePair};
use crate::error::AuthError;

/// One pending login: CSRF state plus the PKCE verifier that redeems its code.
#[derive(Clone)]
pub struct AuthAttempt {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl AuthAttempt {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for AuthAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthAttempt")
            .field("state", &self.state)
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Pending attempts keyed by client session id.
///
/// Holding one slot per session makes "a new login evicts the previous one" a plain
/// map insert, and the mutex serializes begin/consume for the same session.
pub struct AuthSessionStore {
    attempts: Mutex<HashMap<String, AuthAttempt>>,
    ttl: Duration,
}

impl AuthSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { attempts: Mutex::new(HashMap::new()), ttl }
    }

    /// Start a login for `session_id` with fresh random state and verifier.
    pub async fn begin(&self, session_id: &str) -> AuthAttempt {
        self.begin_with(session_id, pkce::generate_state(), PkcePair::generate()).await
    }

    /// Start a login with caller-supplied randomness.
    pub async fn begin_with(&self, session_id: &str, state: String, pair: PkcePair) -> AuthAttempt {
        let now = Instant::now();
        let attempt = AuthAttempt {
            state,
            code_verifier: pair.verifier,
            code_challenge: pair.challenge,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let mut attempts = self.attempts.lock().await;
        // Expired attempts linger one more lifetime so their owner still hears "expired".
        let ttl = self.ttl;
        attempts.retain(|_, a| now < a.expires_at + ttl);
        if attempts.insert(session_id.to_owned(), attempt.clone()).is_some() {
            tracing::debug!(session_id = %session_id, "replaced pending login attempt");
        }
        attempt
    }

    /// Redeem the attempt for `session_id` if `state` matches.
    ///
    /// Successful consumption removes the attempt, so replaying the same state fails
    /// with [`AuthError::InvalidState`]. A mismatching state leaves the pending attempt
    /// in place. An expired attempt is removed and reported as expired.
    pub async fn consume(&self, session_id: &str, state: &str) -> Result<AuthAttempt, AuthError> {
        let mut attempts = self.attempts.lock().await;
        let matches = attempts
            .get(session_id)
            .map(|a| constant_time_eq(&a.state, state))
            .unwrap_or(false);
        if !matches {
            return Err(AuthError::InvalidState);
        }
        let attempt = attempts.remove(session_id).ok_or(AuthError::InvalidState)?;
        if attempt.is_expired_at(Instant::now()) {
            return Err(AuthError::AttemptExpired);
        }
        Ok(attempt)
    }

    /// Drop any pending attempt for `session_id`.
    pub async fn cancel(&self, session_id: &str) -> bool {
        self.attempts.lock().await.remove(session_id).is_some()
    }

    /// Number of attempts held, including expired ones not yet swept.
    pub async fn pending(&self) -> usize {
        self.attempts.lock().await.len()
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "attempt_tests.rs"]
mod tests;
