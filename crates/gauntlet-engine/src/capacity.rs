// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session capacity control and wait-time forecasting.
//!
//! The controller enforces a hard ceiling on concurrently active sessions
//! and keeps a per-challenge tally of generation latency so callers can be
//! told how long a spawn is likely to take. All state lives in one
//! mutex-guarded container; the maintenance worker snapshots it
//! periodically so capacity survives a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::debug;

use gauntlet_model::{CapacitySnapshot, EngineStat, SessionForecast, SessionTicket};

/// Session admission and latency statistics.
pub struct CapacityController {
    max_sessions: usize,
    default_session_minutes: i64,
    state: Mutex<CapacityState>,
}

#[derive(Default)]
struct CapacityState {
    sessions: Vec<SessionTicket>,
    stats: HashMap<String, EngineStat>,
}

impl CapacityController {
    /// Create a controller. `max_sessions` of zero disables enforcement;
    /// `default_session_minutes` is used when a claim passes no duration
    /// and sets the forecast horizon.
    pub fn new(max_sessions: usize, default_session_minutes: i64) -> Self {
        Self {
            max_sessions,
            default_session_minutes,
            state: Mutex::new(CapacityState::default()),
        }
    }

    /// The configured session ceiling.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Claim a session seat.
    ///
    /// Succeeds without recording anything when the ceiling is zero
    /// (unlimited) or a ticket with this id already exists (idempotent
    /// claim). Otherwise the claim succeeds only while the active count is
    /// below the ceiling. `minutes` below 1 falls back to the default
    /// duration.
    pub fn claim_session(&self, id: &str, client_id: &str, minutes: i64) -> bool {
        if self.max_sessions == 0 {
            return true;
        }

        let minutes = if minutes < 1 {
            self.default_session_minutes
        } else {
            minutes
        };

        let mut state = self.state.lock().unwrap();

        if state.sessions.iter().any(|s| s.id == id) {
            return true;
        }

        if state.sessions.len() < self.max_sessions {
            let now = Utc::now();
            state.sessions.push(SessionTicket {
                id: id.to_string(),
                client_id: client_id.to_string(),
                started_at: now,
                expires_at: now + ChronoDuration::minutes(minutes),
            });
            return true;
        }

        false
    }

    /// Release a session seat. Returns true whether or not a matching
    /// ticket existed.
    pub fn remove_session(&self, id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.sessions.retain(|s| s.id != id);
        true
    }

    /// Number of currently recorded tickets.
    pub fn active_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Project seat availability across the default session duration in
    /// 30-minute buckets.
    ///
    /// Expiries are snapshotted under the lock once; the buckets themselves
    /// are produced lazily from that snapshot.
    pub fn session_forecast(&self) -> impl Iterator<Item = SessionForecast> + use<> {
        let expiries: Vec<_> = {
            let state = self.state.lock().unwrap();
            state.sessions.iter().map(|s| s.expires_at).collect()
        };

        let now = Utc::now();
        let max = self.max_sessions as i32;

        (0..self.default_session_minutes)
            .step_by(30)
            .map(move |offset| {
                let time = now + ChronoDuration::minutes(offset);
                let reserved = expiries.iter().filter(|e| time < **e).count() as i32;
                SessionForecast {
                    time,
                    reserved,
                    available: max - reserved,
                }
            })
    }

    /// Fold one generation duration into the tally for a challenge.
    pub fn report_stat(&self, id: &str, duration_seconds: i64) {
        let mut state = self.state.lock().unwrap();
        let stat = state.stats.entry(id.to_string()).or_insert_with(|| EngineStat {
            id: id.to_string(),
            ..Default::default()
        });
        stat.sum += duration_seconds;
        stat.count += 1;
        debug!(
            challenge_id = %stat.id,
            sum = stat.sum,
            count = stat.count,
            average = stat.average(),
            "updated stat"
        );
    }

    /// Estimated wait in seconds for the next spawn of a challenge; zero
    /// when no history exists.
    pub fn challenge_wait_seconds(&self, id: &str) -> i64 {
        let state = self.state.lock().unwrap();
        state.stats.get(id).map(EngineStat::average).unwrap_or(0)
    }

    /// Drop all expired tickets. Returns how many were removed.
    pub fn prune_sessions(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.expires_at > now);
        before - state.sessions.len()
    }

    /// Snapshot sessions and stats for durable storage.
    pub fn backup(&self) -> CapacitySnapshot {
        let state = self.state.lock().unwrap();
        CapacitySnapshot {
            sessions: state.sessions.clone(),
            stats: state.stats.values().cloned().collect(),
        }
    }

    /// Replace sessions and stats from a snapshot.
    pub fn restore(&self, snapshot: CapacitySnapshot) {
        let mut state = self.state.lock().unwrap();
        state.sessions = snapshot.sessions;
        state.stats = snapshot
            .stats
            .into_iter()
            .map(|stat| (stat.id.clone(), stat))
            .collect();
    }
}
