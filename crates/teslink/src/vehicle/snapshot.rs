// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw vehicle payloads and the typed snapshot derived from them.
//!
//! Every numeric field is an `Option`: the upstream omits sections (e.g. no
//! `climate_state` while the car sleeps) and a missing reading must stay missing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entry of the vehicle list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRef {
    /// Identifier used in API paths.
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// `vehicle_data` payload as sent by the upstream, reduced to the fields we read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetry {
    pub id: Option<u64>,
    pub vehicle_id: Option<u64>,
    pub state: Option<String>,
    pub climate_state: Option<RawClimateState>,
    pub charge_state: Option<RawChargeState>,
    pub drive_state: Option<RawDriveState>,
    pub vehicle_state: Option<RawVehicleState>,
    /// The response object as received, unmodelled sections and keys included.
    #[serde(skip)]
    pub payload: Value,
}

impl RawTelemetry {
    /// Read the modelled fields of `payload` and keep the payload alongside.
    pub fn from_payload(payload: Value) -> Result<Self, serde_json::Error> {
        let mut raw = Self::deserialize(&payload)?;
        raw.payload = payload;
        Ok(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClimateState {
    pub inside_temp: Option<f64>,
    pub outside_temp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChargeState {
    pub battery_level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDriveState {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVehicleState {
    pub odometer: Option<f64>,
    pub tpms_pressure_fl: Option<f64>,
    pub tpms_pressure_fr: Option<f64>,
    pub tpms_pressure_rl: Option<f64>,
    pub tpms_pressure_rr: Option<f64>,
}

/// Telemetry of one vehicle at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: u64,
    /// Epoch millis when the poll completed.
    pub fetched_at: u64,
    /// Upstream status such as `online` or `asleep`.
    pub state: Option<String>,
    pub climate: Climate,
    pub charge: Charge,
    pub drive_state: DriveState,
    pub vehicle_state: VehicleState,
    /// Full upstream payload, for clients that show every section.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Climate {
    pub inside_temp: Option<f64>,
    pub outside_temp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub battery_level: Option<f64>,
}

/// Location, present only when the vehicle reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveState {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub odometer: Option<f64>,
    pub tpms_pressure: TyrePressure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TyrePressure {
    pub fl: Option<f64>,
    pub fr: Option<f64>,
    pub rl: Option<f64>,
    pub rr: Option<f64>,
}

impl VehicleSnapshot {
    pub fn from_raw(vehicle_id: u64, raw: RawTelemetry, fetched_at: u64) -> Self {
        let climate = raw.climate_state.unwrap_or_default();
        let charge = raw.charge_state.unwrap_or_default();
        let drive = raw.drive_state.unwrap_or_default();
        let vehicle = raw.vehicle_state.unwrap_or_default();
        Self {
            vehicle_id,
            fetched_at,
            state: raw.state,
            climate: Climate {
                inside_temp: climate.inside_temp,
                outside_temp: climate.outside_temp,
            },
            charge: Charge { battery_level: charge.battery_level },
            drive_state: DriveState { latitude: drive.latitude, longitude: drive.longitude },
            vehicle_state: VehicleState {
                odometer: vehicle.odometer,
                tpms_pressure: TyrePressure {
                    fl: vehicle.tpms_pressure_fl,
                    fr: vehicle.tpms_pressure_fr,
                    rl: vehicle.tpms_pressure_rl,
                    rr: vehicle.tpms_pressure_rr,
                },
            },
            raw: raw.payload,
        }
    }

    /// Both coordinates, if the vehicle reported its position.
    pub fn location(&self) -> Option<(f64, f64)> {
        Some((self.drive_state.latitude?, self.drive_state.longitude?))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
