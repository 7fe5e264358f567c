// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated calls against the owner API.

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ApiError;
use crate::vehicle::snapshot::{RawTelemetry, VehicleRef};

/// Read access to the vehicle API. Object-safe so the poller can run against a fake.
pub trait VehicleApi: Send + Sync + 'static {
    fn list_vehicles<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VehicleRef>, ApiError>>;

    fn get_vehicle_data<'a>(
        &'a self,
        access_token: &'a str,
        vehicle_id: u64,
    ) -> BoxFuture<'a, Result<RawTelemetry, ApiError>>;
}

/// Upstream wraps every payload in `{"response": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    response: Option<T>,
}

pub struct HttpVehicleApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpVehicleApi {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<Option<T>, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200..=299 => {}
            401 => return Err(ApiError::Unauthorized),
            404 => return Err(ApiError::NotFound),
            code => {
                tracing::debug!(status = code, path, "vehicle API error");
                return Err(ApiError::UpstreamError(code));
            }
        }

        let envelope: Envelope<T> = resp.json().await?;
        Ok(envelope.response)
    }
}

impl VehicleApi for HttpVehicleApi {
    fn list_vehicles<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VehicleRef>, ApiError>> {
        Box::pin(async move {
            let vehicles: Option<Vec<VehicleRef>> =
                self.get("/vehicles", access_token).await?;
            Ok(vehicles.unwrap_or_default())
        })
    }

    fn get_vehicle_data<'a>(
        &'a self,
        access_token: &'a str,
        vehicle_id: u64,
    ) -> BoxFuture<'a, Result<RawTelemetry, ApiError>> {
        Box::pin(async move {
            let path = format!("/vehicles/{vehicle_id}/vehicle_data");
            let payload: serde_json::Value = self
                .get(&path, access_token)
                .await?
                .ok_or_else(|| ApiError::Decode("missing response".to_owned()))?;
            RawTelemetry::from_payload(payload).map_err(|e| ApiError::Decode(e.to_string()))
        })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
