// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::auth::oauth::OAuthApi;
use crate::auth::token::TokenSet;
use crate::test_support::{sample_telemetry, FakeOAuth, ScriptedVehicleApi};

fn config() -> PollConfig {
    PollConfig {
        base_interval: Duration::from_secs(1),
        max_backoff: Duration::from_secs(10),
        refresh_margin: Duration::from_secs(60),
    }
}

struct Harness {
    oauth: Arc<FakeOAuth>,
    api: Arc<ScriptedVehicleApi>,
    tokens: Arc<TokenStore>,
    root: CancellationToken,
}

impl Harness {
    async fn new(api: ScriptedVehicleApi) -> Self {
        let oauth = Arc::new(FakeOAuth::new());
        let dyn_oauth: Arc<dyn OAuthApi> = Arc::clone(&oauth) as Arc<dyn OAuthApi>;
        let tokens = Arc::new(TokenStore::new("s-1", dyn_oauth));
        tokens.set(TokenSet::new("at-0", Some("rt-0".into()), Some(Duration::from_secs(3600)))).await;
        Self { oauth, api: Arc::new(api), tokens, root: CancellationToken::new() }
    }

    fn spawn(&self, vehicle_id: Option<u64>) -> PollHandle {
        let api: Arc<dyn VehicleApi> = Arc::clone(&self.api) as Arc<dyn VehicleApi>;
        spawn_poller(Arc::clone(&self.tokens), api, vehicle_id, config(), &self.root)
    }
}

async fn wait_for(
    handle: &PollHandle,
    what: &str,
    pred: impl Fn(&PollState) -> bool,
) -> anyhow::Result<PollState> {
    for _ in 0..10_000 {
        let state = handle.state().await;
        if pred(&state) {
            return Ok(state);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}

fn until(next_poll_at: Option<Instant>) -> Duration {
    next_poll_at.map(|at| at.saturating_duration_since(Instant::now())).unwrap_or_default()
}

#[yare::parameterized(
    first_attempt = { 1, 0, 60, 1 },
    one_failure = { 1, 1, 60, 2 },
    three_failures = { 1, 3, 60, 8 },
    capped = { 10, 5, 300, 300 },
    huge_streak = { 10, 1000, 300, 300 },
)]
fn backoff_is_exponential_and_capped(base: u64, failures: u32, cap: u64, expected: u64) {
    assert_eq!(
        backoff_delay(Duration::from_secs(base), failures, Duration::from_secs(cap)),
        Duration::from_secs(expected)
    );
}

#[test]
fn jitter_stays_within_ten_percent() {
    for _ in 0..100 {
        let d = with_jitter(Duration::from_secs(10));
        assert!(d >= Duration::from_secs(10));
        assert!(d <= Duration::from_secs(11));
    }
}

#[tokio::test(start_paused = true)]
async fn first_poll_discovers_vehicle_and_stores_snapshot() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    let handle = h.spawn(None);

    let state = wait_for(&handle, "snapshot", |s| s.last_snapshot.is_some()).await?;
    assert_eq!(state.status, PollStatus::Polling);
    assert_eq!(state.vehicle_id, Some(1));
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());
    assert!(!state.is_stale());
    let snapshot = state.last_snapshot.ok_or_else(|| anyhow::anyhow!("no snapshot"))?;
    assert_eq!(snapshot.climate.inside_temp, Some(21.0));
    assert_eq!(snapshot.charge.battery_level, Some(80.0));

    // Discovery happens once; later polls reuse the id.
    wait_for(&handle, "third poll", |_| h.api.data_calls() >= 3).await?;
    assert_eq!(h.api.list_calls(), 1);
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pinned_vehicle_skips_discovery() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    let handle = h.spawn(Some(77));

    let state = wait_for(&handle, "snapshot", |s| s.last_snapshot.is_some()).await?;
    assert_eq!(state.last_snapshot.map(|s| s.vehicle_id), Some(77));
    assert_eq!(h.api.list_calls(), 0);
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_then_recover() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    for _ in 0..3 {
        api.push(Err(ApiError::UpstreamError(503)));
    }
    let h = Harness::new(api).await;
    let handle = h.spawn(Some(1));

    for (failures, expected_secs) in [(1u32, 2u64), (2, 4), (3, 8)] {
        let state = wait_for(&handle, "failure", |s| s.consecutive_failures == failures).await?;
        let wait = until(state.next_poll_at);
        let expected = Duration::from_secs(expected_secs);
        assert!(wait <= expected + expected / 10, "failure {failures}: waited {wait:?}");
        assert!(wait + Duration::from_millis(100) >= expected, "failure {failures}: waited {wait:?}");
        let err = state.last_error.ok_or_else(|| anyhow::anyhow!("no error recorded"))?;
        assert_eq!(err.failure, PollFailure::Api(ApiError::UpstreamError(503)));
        assert_eq!(err.consecutive_failures, failures);
    }

    let state = wait_for(&handle, "recovery", |s| s.last_snapshot.is_some()).await?;
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());
    assert!(until(state.next_poll_at) <= Duration::from_secs(1));
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_last_snapshot_as_stale() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    api.push(Ok(sample_telemetry()));
    api.set_fallback(Err(ApiError::NetworkFailure("timeout".into())));
    let h = Harness::new(api).await;
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "stale", |s| s.consecutive_failures >= 2).await?;
    assert_eq!(state.status, PollStatus::Polling);
    assert!(state.is_stale());
    assert_eq!(state.last_snapshot.and_then(|s| s.climate.inside_temp), Some(21.0));
    assert!(matches!(
        state.last_error.map(|e| e.failure),
        Some(PollFailure::Api(ApiError::NetworkFailure(_)))
    ));
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unauthorized_refreshes_and_retries_once() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    api.push(Err(ApiError::Unauthorized));
    let h = Harness::new(api).await;
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "snapshot", |s| s.last_snapshot.is_some()).await?;
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(h.oauth.refresh_count(), 1);
    assert_eq!(h.api.tokens_seen()[..2], ["at-0".to_owned(), "refreshed-1".to_owned()]);
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_stops_in_auth_required() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    api.push(Ok(sample_telemetry()));
    api.set_fallback(Err(ApiError::Unauthorized));
    let h = Harness::new(api).await;
    h.oauth.fail_refresh(AuthError::RefreshRejected);
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "auth required", |s| s.status == PollStatus::AuthRequired).await?;
    assert!(state.last_snapshot.is_some(), "snapshot must survive");
    assert_eq!(state.next_poll_at, None);
    assert_eq!(
        state.last_error.map(|e| e.failure),
        Some(PollFailure::Auth(AuthError::Unauthenticated))
    );
    assert!(!h.tokens.is_authenticated().await);

    // Terminal: the loop exits and no further fetches happen.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.is_finished());
    let calls = h.api.data_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.api.data_calls(), calls);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_tokens_require_login_immediately() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    h.tokens.clear().await;
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "auth required", |s| s.status == PollStatus::AuthRequired).await?;
    assert!(state.last_snapshot.is_none());
    assert_eq!(h.api.data_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_account_retries_with_no_vehicles() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new().with_vehicles(Ok(Vec::new()))).await;
    let handle = h.spawn(None);

    let state = wait_for(&handle, "failure", |s| s.consecutive_failures >= 2).await?;
    assert_eq!(state.status, PollStatus::Polling);
    assert_eq!(state.last_error.map(|e| e.failure), Some(PollFailure::NoVehicles));
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_during_fetch_leaves_state_untouched() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new().with_delay(Duration::from_secs(5))).await;
    let handle = h.spawn(Some(1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.api.data_calls(), 1);
    handle.stop();

    let state = wait_for(&handle, "stopped", |s| s.status == PollStatus::Stopped).await?;
    assert!(state.last_snapshot.is_none());
    assert_eq!(state.consecutive_failures, 0);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.api.data_calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn root_cancellation_stops_poller() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    let handle = h.spawn(Some(1));
    wait_for(&handle, "snapshot", |s| s.last_snapshot.is_some()).await?;

    h.root.cancel();
    let state = wait_for(&handle, "stopped", |s| s.status == PollStatus::Stopped).await?;
    assert!(state.last_snapshot.is_some());
    assert_eq!(state.next_poll_at, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn poll_now_requests_coalesce() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new().with_delay(Duration::from_secs(1))).await;
    let api: Arc<dyn VehicleApi> = Arc::clone(&h.api) as Arc<dyn VehicleApi>;
    let slow = PollConfig { base_interval: Duration::from_secs(60), ..config() };
    let handle = spawn_poller(Arc::clone(&h.tokens), api, Some(1), slow, &h.root);

    tokio::time::sleep(Duration::from_millis(500)).await;
    for _ in 0..3 {
        handle.poll_now();
    }
    tokio::time::sleep(Duration::from_secs(10)).await;
    // The initial fetch plus exactly one extra; the rest waits for the interval.
    assert_eq!(h.api.data_calls(), 2);
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pinned_vehicle_not_found_fails_permanently() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    api.set_fallback(Err(ApiError::NotFound));
    let h = Harness::new(api).await;
    let handle = h.spawn(Some(9));

    let state = wait_for(&handle, "failed", |s| s.status == PollStatus::Failed).await?;
    assert_eq!(state.next_poll_at, None);
    assert_eq!(state.last_error.map(|e| e.failure), Some(PollFailure::Api(ApiError::NotFound)));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(handle.is_finished());
    assert_eq!(h.api.data_calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn discovered_vehicle_not_found_is_rediscovered() -> anyhow::Result<()> {
    let api = ScriptedVehicleApi::new();
    api.push(Err(ApiError::NotFound));
    let h = Harness::new(api).await;
    let handle = h.spawn(None);

    let state = wait_for(&handle, "snapshot", |s| s.last_snapshot.is_some()).await?;
    assert_eq!(state.status, PollStatus::Polling);
    assert_eq!(h.api.list_calls(), 2);
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_client_error_requires_login() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    h.oauth.fail_refresh(AuthError::TokenExchangeFailed { status: 400, body: "invalid_request".into() });
    h.tokens.invalidate("at-0").await;
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "auth required", |s| s.status == PollStatus::AuthRequired).await?;
    assert!(matches!(
        state.last_error.map(|e| e.failure),
        Some(PollFailure::Auth(AuthError::TokenExchangeFailed { status: 400, .. }))
    ));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.oauth.refresh_count(), 1);
    assert_eq!(h.api.data_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_server_error_keeps_retrying() -> anyhow::Result<()> {
    let h = Harness::new(ScriptedVehicleApi::new()).await;
    h.oauth.fail_refresh(AuthError::TokenExchangeFailed { status: 503, body: String::new() });
    h.tokens.invalidate("at-0").await;
    let handle = h.spawn(Some(1));

    let state = wait_for(&handle, "retries", |s| s.consecutive_failures >= 2).await?;
    assert_eq!(state.status, PollStatus::Polling);
    assert!(h.tokens.is_authenticated().await);
    handle.shutdown().await;
    Ok(())
}
