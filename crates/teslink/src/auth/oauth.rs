// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization URL construction and token endpoint grants.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::auth::token::TokenSet;
use crate::error::AuthError;

/// Upstream `error` codes that mean the refresh token is dead.
const REJECTED_GRANT_ERRORS: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// Static OAuth client registration.
#[derive(Clone)]
pub struct OAuthConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    /// Present only for confidential clients.
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

impl OAuthConfig {
    /// Authorization URL for one login attempt.
    pub fn authorize_url_for(&self, code_challenge: &str, state: &str) -> String {
        build_authorize_url(
            &self.authorize_url,
            &self.client_id,
            &self.redirect_uri,
            &self.scope,
            code_challenge,
            state,
        )
    }
}

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Clone, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// Token endpoint operations. Object-safe so tests can substitute a fake.
pub trait OAuthApi: Send + Sync + 'static {
    /// Redeem an authorization code together with the verifier of its attempt.
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
    ) -> BoxFuture<'a, Result<TokenSet, AuthError>>;

    /// Trade a refresh token for a new token set.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenSet, AuthError>>;
}

/// Build the full authorization URL with PKCE parameters.
///
/// Every value is percent-encoded exactly once; `code_challenge_method` is always `S256`.
pub fn build_authorize_url(
    authorize_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    code_challenge: &str,
    state: &str,
) -> String {
    let sep = if authorize_url.contains('?') { '&' } else { '?' };
    format!(
        "{authorize_url}{sep}client_id={client_id}\
         &redirect_uri={redirect_uri}\
         &response_type=code\
         &scope={scope}\
         &code_challenge={code_challenge}\
         &code_challenge_method=S256\
         &state={state}",
        client_id = urlencoding(client_id),
        redirect_uri = urlencoding(redirect_uri),
        scope = urlencoding(scope),
        code_challenge = urlencoding(code_challenge),
        state = urlencoding(state),
    )
}

/// `reqwest`-backed token endpoint client.
pub struct HttpOAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl HttpOAuthClient {
    pub fn new(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    async fn post_grant(&self, params: &[(&str, &str)]) -> Result<TokenResponse, GrantFailure> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| GrantFailure::Auth(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "token endpoint error");
            return Err(GrantFailure::Status { status: status.as_u16(), body });
        }

        resp.json::<TokenResponse>().await.map_err(|e| GrantFailure::Auth(e.into()))
    }
}

enum GrantFailure {
    Auth(AuthError),
    Status { status: u16, body: String },
}

impl OAuthApi for HttpOAuthClient {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
    ) -> BoxFuture<'a, Result<TokenSet, AuthError>> {
        Box::pin(async move {
            let params = [
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ];
            match self.post_grant(&params).await {
                Ok(token) => {
                    tracing::info!(
                        expires_in = ?token.expires_in,
                        has_refresh_token = token.refresh_token.is_some(),
                        "authorization code exchanged"
                    );
                    Ok(TokenSet::from_response(token))
                }
                Err(GrantFailure::Auth(e)) => Err(e),
                Err(GrantFailure::Status { status, body }) => {
                    tracing::warn!(status, "authorization code exchange failed");
                    Err(AuthError::TokenExchangeFailed { status, body })
                }
            }
        })
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenSet, AuthError>> {
        Box::pin(async move {
            let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
            match self.post_grant(&params).await {
                Ok(token) => Ok(TokenSet::from_response(token)),
                Err(GrantFailure::Auth(e)) => Err(e),
                Err(GrantFailure::Status { status, body }) => {
                    if is_rejected_grant(status, &body) {
                        tracing::warn!(status, "refresh token rejected");
                        Err(AuthError::RefreshRejected)
                    } else {
                        tracing::warn!(status, "token refresh failed");
                        Err(AuthError::TokenExchangeFailed { status, body })
                    }
                }
            }
        })
    }
}

/// Whether a failed refresh means the grant itself is dead rather than the server being unwell.
fn is_rejected_grant(status: u16, body: &str) -> bool {
    if status == 401 {
        return true;
    }
    if !(400..500).contains(&status) {
        return false;
    }
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => REJECTED_GRANT_ERRORS.contains(&err.error.as_str()),
        Err(_) => body.contains("invalid_grant"),
    }
}

/// Form-style encoding for URL query parameters (spaces as `+`).
fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
