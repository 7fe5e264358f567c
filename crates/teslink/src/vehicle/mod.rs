// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vehicle API access and background telemetry polling.

pub mod client;
pub mod poller;
pub mod snapshot;
