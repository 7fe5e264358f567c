// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background telemetry polling for one session.
//!
//! One task per session fetches a snapshot, records the outcome in a shared
//! [`PollState`], then sleeps until the next attempt. Failures keep the last good
//! snapshot and stretch the interval exponentially. A dead login stops the loop
//! in [`PollStatus::AuthRequired`]; any other non-transient failure stops it in
//! [`PollStatus::Failed`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::token::TokenStore;
use crate::error::{ApiError, AuthError, PollError, PollFailure};
use crate::state::epoch_ms;
use crate::vehicle::client::VehicleApi;
use crate::vehicle::snapshot::VehicleSnapshot;

/// Exponent cap for the backoff multiplier.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub base_interval: Duration,
    pub max_backoff: Duration,
    /// Refresh the access token when it expires within this window.
    pub refresh_margin: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Idle,
    Polling,
    /// Terminal until a new login restarts the poller.
    AuthRequired,
    /// Terminal: the upstream gave an answer that retrying cannot change.
    Failed,
    Stopped,
}

/// What readers of a session see.
#[derive(Debug, Clone)]
pub struct PollState {
    pub status: PollStatus,
    /// Pinned by configuration or discovered on the first successful listing.
    pub vehicle_id: Option<u64>,
    /// Newest successful snapshot; survives later failures.
    pub last_snapshot: Option<VehicleSnapshot>,
    pub last_error: Option<PollError>,
    pub consecutive_failures: u32,
    pub next_poll_at: Option<Instant>,
}

impl PollState {
    fn new(vehicle_id: Option<u64>) -> Self {
        Self {
            status: PollStatus::Idle,
            vehicle_id,
            last_snapshot: None,
            last_error: None,
            consecutive_failures: 0,
            next_poll_at: None,
        }
    }

    /// Serving data that predates at least one failed poll.
    pub fn is_stale(&self) -> bool {
        self.last_snapshot.is_some() && self.consecutive_failures > 0
    }
}

/// `min(base * 2^failures, cap)`.
pub fn backoff_delay(base: Duration, consecutive_failures: u32, cap: Duration) -> Duration {
    let factor = 1u32 << consecutive_failures.min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(factor).min(cap)
}

/// Add up to 10% random jitter so sessions do not retry in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() / 10) as u64;
    if max_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Control and read handle for a running poller.
pub struct PollHandle {
    state: Arc<RwLock<PollState>>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub async fn state(&self) -> PollState {
        self.state.read().await.clone()
    }

    /// Skip the remaining wait. Requests made while a fetch is in flight
    /// collapse into a single extra poll.
    pub fn poll_now(&self) {
        self.wake.notify_one();
    }

    /// Ask the loop to stop; an in-flight fetch is abandoned without touching state.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(err = %e, "poller task failed");
        }
    }
}

/// Start polling on behalf of `tokens`. The loop also ends when `parent` is cancelled.
pub fn spawn_poller(
    tokens: Arc<TokenStore>,
    api: Arc<dyn VehicleApi>,
    vehicle_id: Option<u64>,
    config: PollConfig,
    parent: &CancellationToken,
) -> PollHandle {
    let state = Arc::new(RwLock::new(PollState::new(vehicle_id)));
    let cancel = parent.child_token();
    let wake = Arc::new(Notify::new());
    let poller = Poller {
        tokens,
        api,
        config,
        pinned_vehicle: vehicle_id,
        state: Arc::clone(&state),
        cancel: cancel.clone(),
        wake: Arc::clone(&wake),
    };
    let task = tokio::spawn(poller.run());
    PollHandle { state, cancel, wake, task }
}

struct Poller {
    tokens: Arc<TokenStore>,
    api: Arc<dyn VehicleApi>,
    config: PollConfig,
    pinned_vehicle: Option<u64>,
    state: Arc<RwLock<PollState>>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

enum Next {
    After(Duration),
    Halt,
}

impl Poller {
    async fn run(self) {
        let session_id = self.tokens.session_id().to_owned();
        tracing::info!(session_id = %session_id, "poller started");
        self.state.write().await.status = PollStatus::Polling;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };
            let delay = match self.record(outcome).await {
                Next::After(delay) => delay,
                Next::Halt => {
                    tracing::warn!(session_id = %session_id, "poller halted");
                    return;
                }
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut state = self.state.write().await;
        state.status = PollStatus::Stopped;
        state.next_poll_at = None;
        tracing::info!(session_id = %session_id, "poller stopped");
    }

    /// One poll, retrying once with a refreshed token when the API rejects ours.
    async fn poll_once(&self) -> Result<VehicleSnapshot, PollFailure> {
        let token = self.tokens.ensure_valid(self.config.refresh_margin).await?;
        match self.fetch(&token).await {
            Err(PollFailure::Api(ApiError::Unauthorized)) => {
                tracing::info!(
                    session_id = %self.tokens.session_id(),
                    "access token rejected, refreshing"
                );
                self.tokens.invalidate(&token).await;
                let token = self.tokens.ensure_valid(self.config.refresh_margin).await?;
                match self.fetch(&token).await {
                    Err(PollFailure::Api(ApiError::Unauthorized)) => {
                        self.tokens.clear().await;
                        Err(AuthError::Unauthenticated.into())
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn fetch(&self, token: &str) -> Result<VehicleSnapshot, PollFailure> {
        let known = self.state.read().await.vehicle_id;
        let vehicle_id = match known {
            Some(id) => id,
            None => self.discover_vehicle(token).await?,
        };
        let raw = self.api.get_vehicle_data(token, vehicle_id).await?;
        Ok(VehicleSnapshot::from_raw(vehicle_id, raw, epoch_ms()))
    }

    async fn discover_vehicle(&self, token: &str) -> Result<u64, PollFailure> {
        let vehicles = self.api.list_vehicles(token).await?;
        let first = vehicles.first().ok_or(PollFailure::NoVehicles)?;
        tracing::info!(
            session_id = %self.tokens.session_id(),
            vehicle_id = first.id,
            count = vehicles.len(),
            "vehicle discovered"
        );
        self.state.write().await.vehicle_id = Some(first.id);
        Ok(first.id)
    }

    async fn record(&self, outcome: Result<VehicleSnapshot, PollFailure>) -> Next {
        let mut state = self.state.write().await;
        match outcome {
            Ok(snapshot) => {
                tracing::debug!(
                    session_id = %self.tokens.session_id(),
                    vehicle_id = snapshot.vehicle_id,
                    "snapshot updated"
                );
                state.last_snapshot = Some(snapshot);
                state.last_error = None;
                state.consecutive_failures = 0;
                let delay = self.config.base_interval;
                state.next_poll_at = Some(Instant::now() + delay);
                Next::After(delay)
            }
            Err(failure) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let failures = state.consecutive_failures;
                let rediscover = matches!(failure, PollFailure::Api(ApiError::NotFound))
                    && self.pinned_vehicle.is_none();
                let terminal = if failure.requires_login() {
                    Some(PollStatus::AuthRequired)
                } else if !failure.is_transient() && !rediscover {
                    Some(PollStatus::Failed)
                } else {
                    None
                };
                if let Some(status) = terminal {
                    tracing::warn!(
                        session_id = %self.tokens.session_id(),
                        err = %failure,
                        ?status,
                        "poll failed permanently"
                    );
                    state.status = status;
                    state.next_poll_at = None;
                    state.last_error = Some(PollError { failure, consecutive_failures: failures });
                    return Next::Halt;
                }
                if rediscover {
                    // Vehicle left the account; pick again on the next attempt.
                    state.vehicle_id = None;
                }
                let delay = with_jitter(backoff_delay(
                    self.config.base_interval,
                    failures,
                    self.config.max_backoff,
                ));
                tracing::warn!(
                    session_id = %self.tokens.session_id(),
                    err = %failure,
                    consecutive_failures = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "poll failed"
                );
                state.last_error = Some(PollError { failure, consecutive_failures: failures });
                state.next_poll_at = Some(Instant::now() + delay);
                Next::After(delay)
            }
        }
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
