// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use crate::auth::oauth::OAuthConfig;
use crate::vehicle::poller::PollConfig;

/// Vehicle telemetry gateway with OAuth2 PKCE login.
#[derive(Debug, Clone, Parser)]
#[command(name = "teslink", version, about)]
pub struct Config {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "TESLINK_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8066, env = "TESLINK_PORT")]
    pub port: u16,

    /// OAuth client identifier.
    #[arg(long, env = "TESLINK_CLIENT_ID")]
    pub client_id: String,

    /// OAuth client secret. Omit for a public PKCE client.
    #[arg(long, env = "TESLINK_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the authorization server.
    #[arg(long, default_value = "http://localhost:8066/callback", env = "TESLINK_REDIRECT_URI")]
    pub redirect_uri: String,

    /// Space-separated OAuth scopes.
    #[arg(
        long,
        default_value = "openid offline_access vehicle_device_data",
        env = "TESLINK_SCOPE"
    )]
    pub scope: String,

    /// Authorization endpoint.
    #[arg(
        long,
        default_value = "https://auth.tesla.com/oauth2/v3/authorize",
        env = "TESLINK_AUTHORIZE_URL"
    )]
    pub authorize_url: String,

    /// Token endpoint.
    #[arg(
        long,
        default_value = "https://auth.tesla.com/oauth2/v3/token",
        env = "TESLINK_TOKEN_URL"
    )]
    pub token_url: String,

    /// Vehicle API base URL.
    #[arg(
        long,
        default_value = "https://owner-api.teslamotors.com/api/1",
        env = "TESLINK_API_BASE"
    )]
    pub api_base: String,

    /// Base telemetry poll interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TESLINK_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Upper bound for the failure backoff in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "TESLINK_MAX_BACKOFF_MS")]
    pub max_backoff_ms: u64,

    /// Refresh access tokens this many seconds before they expire.
    #[arg(long, default_value_t = 60, env = "TESLINK_REFRESH_MARGIN_SECS")]
    pub refresh_margin_secs: u64,

    /// Lifetime of a pending login attempt in seconds.
    #[arg(long, default_value_t = 600, env = "TESLINK_ATTEMPT_TTL_SECS")]
    pub attempt_ttl_secs: u64,

    /// Timeout for every outbound HTTP request in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TESLINK_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,

    /// Where `/callback` redirects after a successful login.
    #[arg(long, default_value = "/data", env = "TESLINK_LANDING_PATH")]
    pub landing_path: String,

    /// Vehicle to monitor. Defaults to the first vehicle on the account.
    #[arg(long, env = "TESLINK_VEHICLE_ID")]
    pub vehicle_id: Option<u64>,

    /// Pre-issued access token for headless operation.
    #[arg(long, env = "TESLA_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Refresh token paired with `--access-token`.
    #[arg(long, env = "TESLINK_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Persist tokens to this file. Without it tokens live in memory only.
    #[arg(long, env = "TESLINK_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "TESLINK_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TESLINK_LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            anyhow::bail!("--client-id must not be empty");
        }
        for (flag, value) in [
            ("--redirect-uri", &self.redirect_uri),
            ("--authorize-url", &self.authorize_url),
            ("--token-url", &self.token_url),
            ("--api-base", &self.api_base),
        ] {
            let url = Url::parse(value)
                .map_err(|e| anyhow::anyhow!("{flag} is not a valid URL ({value}): {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("{flag} must be an http(s) URL: {value}");
            }
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("--poll-interval-ms must be greater than zero");
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            anyhow::bail!("--max-backoff-ms must not be smaller than --poll-interval-ms");
        }
        if !self.landing_path.starts_with('/') {
            anyhow::bail!("--landing-path must start with '/'");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text, got {}", self.log_format);
        }
        Ok(())
    }

    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            authorize_url: self.authorize_url.clone(),
            token_url: self.token_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(self.poll_interval_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            refresh_margin: self.refresh_margin(),
        }
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn attempt_ttl(&self) -> Duration {
        Duration::from_secs(self.attempt_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
