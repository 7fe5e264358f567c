// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the token endpoint and vehicle API,
//! plus builders for state and local upstream servers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::auth::oauth::OAuthApi;
use crate::auth::token::TokenSet;
use crate::config::Config;
use crate::error::{ApiError, AuthError};
use crate::state::AppState;
use crate::vehicle::client::VehicleApi;
use crate::vehicle::snapshot::{RawChargeState, RawClimateState, RawTelemetry, VehicleRef};

/// Token endpoint fake that counts calls and returns scripted outcomes.
pub struct FakeOAuth {
    refresh_calls: AtomicU32,
    exchanges: Mutex<Vec<(String, String)>>,
    exchange_error: Mutex<Option<AuthError>>,
    refresh_error: Mutex<Option<AuthError>>,
    refresh_delay: Duration,
    lifetime: Option<Duration>,
}

impl Default for FakeOAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOAuth {
    pub fn new() -> Self {
        Self {
            refresh_calls: AtomicU32::new(0),
            exchanges: Mutex::new(Vec::new()),
            exchange_error: Mutex::new(None),
            refresh_error: Mutex::new(None),
            refresh_delay: Duration::ZERO,
            lifetime: Some(Duration::from_secs(3600)),
        }
    }

    /// Every refresh sleeps this long, so concurrent callers overlap.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Lifetime reported for issued tokens.
    pub fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn fail_refresh(&self, err: AuthError) {
        if let Ok(mut slot) = self.refresh_error.lock() {
            *slot = Some(err);
        }
    }

    pub fn fail_exchange(&self, err: AuthError) {
        if let Ok(mut slot) = self.exchange_error.lock() {
            *slot = Some(err);
        }
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// `(code, code_verifier)` pairs seen by `exchange_code`.
    pub fn exchanges(&self) -> Vec<(String, String)> {
        self.exchanges.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl OAuthApi for FakeOAuth {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
    ) -> BoxFuture<'a, Result<TokenSet, AuthError>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.exchanges.lock() {
                seen.push((code.to_owned(), code_verifier.to_owned()));
            }
            if let Some(err) = self.exchange_error.lock().ok().and_then(|e| e.clone()) {
                return Err(err);
            }
            let refresh = Some(format!("refresh-{code}"));
            Ok(TokenSet::new(format!("access-{code}"), refresh, self.lifetime))
        })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenSet, AuthError>> {
        Box::pin(async move {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            if let Some(err) = self.refresh_error.lock().ok().and_then(|e| e.clone()) {
                return Err(err);
            }
            Ok(TokenSet::new(format!("refreshed-{n}"), None, self.lifetime))
        })
    }
}

/// Vehicle API fake: pops scripted outcomes, then repeats the fallback.
pub struct ScriptedVehicleApi {
    vehicles: Mutex<Result<Vec<VehicleRef>, ApiError>>,
    script: Mutex<VecDeque<Result<RawTelemetry, ApiError>>>,
    fallback: Mutex<Result<RawTelemetry, ApiError>>,
    data_calls: AtomicU32,
    list_calls: AtomicU32,
    tokens_seen: Mutex<Vec<String>>,
    delay: Duration,
}

impl Default for ScriptedVehicleApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedVehicleApi {
    /// One vehicle (id 1) that always answers with [`sample_telemetry`].
    pub fn new() -> Self {
        Self {
            vehicles: Mutex::new(Ok(vec![vehicle_ref(1)])),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(sample_telemetry())),
            data_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every data fetch takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_vehicles(self, vehicles: Result<Vec<VehicleRef>, ApiError>) -> Self {
        if let Ok(mut slot) = self.vehicles.lock() {
            *slot = vehicles;
        }
        self
    }

    /// Queue outcomes returned by the next data fetches, in order.
    pub fn push(&self, outcome: Result<RawTelemetry, ApiError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    /// Outcome once the script is exhausted.
    pub fn set_fallback(&self, outcome: Result<RawTelemetry, ApiError>) {
        if let Ok(mut slot) = self.fallback.lock() {
            *slot = outcome;
        }
    }

    pub fn data_calls(&self) -> u32 {
        self.data_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Access tokens presented to the data endpoint.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl VehicleApi for ScriptedVehicleApi {
    fn list_vehicles<'a>(
        &'a self,
        _access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VehicleRef>, ApiError>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.vehicles.lock().map(|v| v.clone()).unwrap_or(Ok(Vec::new()))
        })
    }

    fn get_vehicle_data<'a>(
        &'a self,
        access_token: &'a str,
        _vehicle_id: u64,
    ) -> BoxFuture<'a, Result<RawTelemetry, ApiError>> {
        Box::pin(async move {
            self.data_calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.tokens_seen.lock() {
                seen.push(access_token.to_owned());
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
            match scripted {
                Some(outcome) => outcome,
                None => self
                    .fallback
                    .lock()
                    .map(|f| f.clone())
                    .unwrap_or_else(|_| Err(ApiError::UpstreamError(500))),
            }
        })
    }
}

pub fn vehicle_ref(id: u64) -> VehicleRef {
    VehicleRef {
        id,
        vehicle_id: Some(id + 1000),
        vin: None,
        display_name: Some(format!("car-{id}")),
        state: Some("online".to_owned()),
    }
}

/// Online vehicle with climate and charge readings.
pub fn sample_telemetry() -> RawTelemetry {
    RawTelemetry {
        state: Some("online".to_owned()),
        climate_state: Some(RawClimateState { inside_temp: Some(21.0), outside_temp: Some(12.5) }),
        charge_state: Some(RawChargeState { battery_level: Some(80.0) }),
        payload: serde_json::json!({
            "state": "online",
            "climate_state": { "inside_temp": 21.0, "outside_temp": 12.5 },
            "charge_state": { "battery_level": 80.0 },
            "vehicle_config": { "car_type": "modely" }
        }),
        ..RawTelemetry::default()
    }
}

/// Configuration with a test client id, fast polling and no persistence.
pub fn test_config(extra: &[&str]) -> anyhow::Result<Config> {
    let mut args = vec!["teslink", "--client-id", "test-client", "--poll-interval-ms", "1000"];
    args.extend_from_slice(extra);
    Ok(Config::try_parse_from(args)?)
}

/// Application state wired to the given fakes.
pub fn test_state(
    config: Config,
    oauth: Arc<FakeOAuth>,
    vehicles: Arc<ScriptedVehicleApi>,
) -> Arc<AppState> {
    Arc::new(AppState::new(config, oauth, vehicles, CancellationToken::new()))
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(router: axum::Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

/// HTTP client with the crypto provider installed.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    crate::build_http_client(Duration::from_secs(5))
}
