// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PKCE (RFC 7636) verifier/challenge pairs and CSRF state tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Random bytes behind a verifier (32 bytes → 43 base64url chars).
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind a state token.
const STATE_BYTES: usize = 32;

/// A code verifier and the S256 challenge derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Generate a fresh pair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self::from_verifier(generate_code_verifier())
    }

    /// Derive the challenge for a known verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_code_challenge(&verifier);
        Self { verifier, challenge }
    }
}

/// Generate a PKCE code verifier (43-128 char URL-safe random string).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute code_challenge = base64url_nopad(sha256(verifier)).
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random state parameter.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether `s` only uses the RFC 7636 unreserved alphabet and has a legal length.
pub fn is_valid_verifier(s: &str) -> bool {
    (43..=128).contains(&s.len())
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

#[cfg(test)]
#[path = "pkce_tests.rs"]
mod tests;
