// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background maintenance for capacity state.
//!
//! Each tick prunes expired session tickets and writes a JSON snapshot of
//! the capacity controller so sessions and latency statistics survive a
//! process restart. A final snapshot is written on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use gauntlet_model::CapacitySnapshot;

use crate::capacity::CapacityController;

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Snapshot file location.
    pub snapshot_path: PathBuf,
    /// How often to prune and snapshot.
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("_data/stats.json"),
            interval: Duration::from_secs(60),
        }
    }
}

/// Background worker that prunes sessions and snapshots capacity state.
pub struct MaintenanceWorker {
    capacity: Arc<CapacityController>,
    config: MaintenanceConfig,
    shutdown: Arc<Notify>,
}

impl MaintenanceWorker {
    /// Create a new maintenance worker.
    pub fn new(capacity: Arc<CapacityController>, config: MaintenanceConfig) -> Self {
        Self {
            capacity,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Restore capacity state from the snapshot file, if one exists.
    pub async fn restore(&self) -> std::io::Result<bool> {
        let data = match tokio::fs::read(&self.config.snapshot_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no capacity snapshot to restore");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<CapacitySnapshot>(&data) {
            Ok(snapshot) => {
                info!(
                    sessions = snapshot.sessions.len(),
                    stats = snapshot.stats.len(),
                    "restored capacity snapshot"
                );
                self.capacity.restore(snapshot);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "capacity snapshot is unreadable, starting fresh");
                Ok(false)
            }
        }
    }

    /// Run the maintenance loop until shutdown; a final snapshot is
    /// written before returning.
    pub async fn run(&self) {
        info!(
            snapshot = %self.config.snapshot_path.display(),
            interval_secs = self.config.interval.as_secs(),
            "maintenance worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("maintenance worker received shutdown signal");
                    self.run_maintenance().await;
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_maintenance().await;
                }
            }
        }

        info!("maintenance worker stopped");
    }

    /// One maintenance pass: prune expired sessions, write the snapshot.
    pub async fn run_maintenance(&self) {
        let pruned = self.capacity.prune_sessions();
        if pruned > 0 {
            info!(pruned, "pruned expired sessions");
        }

        if let Err(e) = self.write_snapshot().await {
            error!(error = %e, "failed to write capacity snapshot");
        }
    }

    async fn write_snapshot(&self) -> std::io::Result<()> {
        if let Some(parent) = self.config.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let snapshot = self.capacity.backup();
        let data = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&self.config.snapshot_path, data).await
    }
}
