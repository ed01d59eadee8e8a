// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capacity tickets and engine latency statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A capacity-controller lease for one occupied broker seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicket {
    /// Session key, normally the owning team identity.
    pub id: String,
    /// Client that claimed the session.
    pub client_id: String,
    /// When the session was claimed.
    pub started_at: DateTime<Utc>,
    /// When the session lapses and becomes prunable.
    pub expires_at: DateTime<Utc>,
}

/// Running generation-latency tally for one challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStat {
    /// Challenge identity.
    pub id: String,
    /// Total observed generation seconds.
    pub sum: i64,
    /// Number of observations.
    pub count: i64,
}

impl EngineStat {
    /// Mean generation seconds; zero before any observation.
    pub fn average(&self) -> i64 {
        if self.count == 0 { 0 } else { self.sum / self.count }
    }
}

/// Durable snapshot of capacity state, written by the maintenance worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    /// Active session tickets at snapshot time.
    pub sessions: Vec<SessionTicket>,
    /// Per-challenge latency tallies.
    pub stats: Vec<EngineStat>,
}
