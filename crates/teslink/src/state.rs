// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::attempt::AuthSessionStore;
use crate::auth::oauth::{OAuthApi, OAuthConfig};
use crate::auth::persist::{self, TokenFile};
use crate::auth::token::{TokenSet, TokenStore};
use crate::config::Config;
use crate::vehicle::client::VehicleApi;
use crate::vehicle::poller::{spawn_poller, PollHandle, PollState};

/// Session used by headless bootstrap and by clients without a session cookie.
pub const DEFAULT_SESSION: &str = "default";

/// Shared gateway state.
pub struct AppState {
    pub config: Config,
    pub oauth_config: OAuthConfig,
    pub oauth: Arc<dyn OAuthApi>,
    pub vehicles: Arc<dyn VehicleApi>,
    /// Pending logins, keyed by client session.
    pub attempts: AuthSessionStore,
    pub sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
    /// Shared by every session's token store when `--token-file` is set.
    pub token_file: Option<Arc<TokenFile>>,
    pub shutdown: CancellationToken,
}

/// One browser (or the headless default) with its tokens and poller.
pub struct ClientSession {
    pub id: String,
    pub tokens: Arc<TokenStore>,
    pub poller: RwLock<Option<PollHandle>>,
    pub created_at: Instant,
}

impl ClientSession {
    /// Poll state, or `None` when no poller has been started.
    pub async fn poll_state(&self) -> Option<PollState> {
        match self.poller.read().await.as_ref() {
            Some(handle) => Some(handle.state().await),
            None => None,
        }
    }
}

impl AppState {
    pub fn new(
        config: Config,
        oauth: Arc<dyn OAuthApi>,
        vehicles: Arc<dyn VehicleApi>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            oauth_config: config.oauth_config(),
            attempts: AuthSessionStore::new(config.attempt_ttl()),
            token_file: config.token_file.clone().map(|p| Arc::new(TokenFile::new(p))),
            config,
            oauth,
            vehicles,
            sessions: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    pub async fn session(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn get_or_create_session(&self, id: &str) -> Arc<ClientSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(id) {
            return Arc::clone(existing);
        }
        let tokens = TokenStore::new(id, Arc::clone(&self.oauth))
            .with_persistence(self.token_file.clone());
        let session = Arc::new(ClientSession {
            id: id.to_owned(),
            tokens: Arc::new(tokens),
            poller: RwLock::new(None),
            created_at: Instant::now(),
        });
        sessions.insert(id.to_owned(), Arc::clone(&session));
        session
    }

    /// Session named by the cookie, falling back to the default session.
    pub async fn resolve_session(&self, cookie_id: Option<&str>) -> Option<Arc<ClientSession>> {
        let sessions = self.sessions.read().await;
        cookie_id.and_then(|id| sessions.get(id)).or_else(|| sessions.get(DEFAULT_SESSION)).cloned()
    }

    /// (Re)start the poller of `session`, stopping any previous one first.
    pub async fn start_polling(&self, session: &ClientSession) {
        let handle = spawn_poller(
            Arc::clone(&session.tokens),
            Arc::clone(&self.vehicles),
            self.config.vehicle_id,
            self.config.poll_config(),
            &self.shutdown,
        );
        let previous = session.poller.write().await.replace(handle);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    /// Drop a session: stop its poller and destroy its tokens.
    pub async fn remove_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        self.attempts.cancel(id).await;
        let Some(session) = removed else {
            return false;
        };
        if let Some(handle) = session.poller.write().await.take() {
            handle.shutdown().await;
        }
        session.tokens.clear().await;
        tracing::info!(session_id = %id, "session removed");
        true
    }

    /// Forget sessions that never finished a login within the attempt lifetime.
    pub async fn prune_idle_sessions(&self) {
        let ttl = self.config.attempt_ttl();
        let now = Instant::now();
        let candidates: Vec<Arc<ClientSession>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.id != DEFAULT_SESSION && now.duration_since(s.created_at) > ttl)
            .cloned()
            .collect();
        for session in candidates {
            if !session.tokens.is_authenticated().await {
                self.sessions.write().await.remove(&session.id);
                tracing::debug!(session_id = %session.id, "idle session pruned");
            }
        }
    }

    /// Seed the default session from configured or persisted tokens and start polling.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let seeded = match self.config.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(access_token) => {
                tracing::info!("using access token from configuration");
                Some(TokenSet::new(access_token, self.config.refresh_token.clone(), None))
            }
            None => match self.token_file.as_deref() {
                Some(file) => persist::load(file.path())?.map(|p| {
                    tracing::info!(path = %file.path().display(), "restored persisted tokens");
                    p.into_token_set()
                }),
                None => None,
            },
        };
        if let Some(tokens) = seeded {
            let session = self.get_or_create_session(DEFAULT_SESSION).await;
            session.tokens.set(tokens).await;
            self.start_polling(&session).await;
        }
        Ok(())
    }

    /// Stop every poller and wait for them to exit.
    pub async fn shutdown_pollers(&self) {
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut handles = Vec::new();
        for session in sessions {
            if let Some(handle) = session.poller.write().await.take() {
                handles.push(handle.shutdown());
            }
        }
        futures_util::future::join_all(handles).await;
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
