// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spec and context storage.
//!
//! [`GameStore`] abstracts persistence of challenge specs and per-problem
//! contexts so the engine never touches storage directly. [`MemoryStore`]
//! is the in-tree implementation: specs and contexts in `RwLock`-guarded
//! maps with incremental upserts, and soft deletes that move specs into a
//! timestamped archive rather than destroying them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use gauntlet_model::{ChallengeSpec, ProblemContext};

use crate::error::Result;

/// Storage capability for challenge specs and problem contexts.
///
/// Implementations are free to back this with files, a database, or memory;
/// the engine only requires that `save_context` is visible to a subsequent
/// `load_context` for the same id.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Look up a challenge spec by slug.
    async fn get_spec(&self, slug: &str) -> Result<Option<ChallengeSpec>>;

    /// Load the persisted working record for a problem, if any.
    async fn load_context(&self, id: &str) -> Result<Option<ProblemContext>>;

    /// Persist a problem's working record.
    async fn save_context(&self, context: &ProblemContext) -> Result<()>;

    /// Create or replace a challenge spec.
    async fn save_spec(&self, name: &str, spec: &ChallengeSpec) -> Result<bool>;

    /// Soft-delete a challenge spec. Returns true even when absent.
    async fn delete_spec(&self, name: &str) -> Result<bool>;

    /// Move a challenge spec into the archive without deleting it.
    async fn archive_spec(&self, name: &str) -> Result<bool>;
}

/// In-memory [`GameStore`] implementation.
///
/// Writes are incremental upserts; readers never observe a window where a
/// spec map is mid-reload.
#[derive(Default)]
pub struct MemoryStore {
    specs: RwLock<HashMap<String, ChallengeSpec>>,
    contexts: RwLock<HashMap<String, ProblemContext>>,
    archive: RwLock<HashMap<String, ChallengeSpec>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with the given specs, keyed by slug.
    pub fn with_specs(specs: impl IntoIterator<Item = ChallengeSpec>) -> Self {
        let map: HashMap<String, ChallengeSpec> = specs
            .into_iter()
            .map(|spec| (spec.slug.clone(), spec))
            .collect();
        Self {
            specs: RwLock::new(map),
            ..Default::default()
        }
    }

    /// Number of archived spec revisions, for inspection.
    pub async fn archived_count(&self) -> usize {
        self.archive.read().await.len()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn get_spec(&self, slug: &str) -> Result<Option<ChallengeSpec>> {
        Ok(self.specs.read().await.get(slug).cloned())
    }

    async fn load_context(&self, id: &str) -> Result<Option<ProblemContext>> {
        Ok(self.contexts.read().await.get(id).cloned())
    }

    async fn save_context(&self, context: &ProblemContext) -> Result<()> {
        self.contexts
            .write()
            .await
            .insert(context.problem.id.clone(), context.clone());
        Ok(())
    }

    async fn save_spec(&self, name: &str, spec: &ChallengeSpec) -> Result<bool> {
        self.specs
            .write()
            .await
            .insert(name.to_string(), spec.clone());
        Ok(true)
    }

    async fn delete_spec(&self, name: &str) -> Result<bool> {
        let removed = self.specs.write().await.remove(name);
        if let Some(spec) = removed {
            let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3f");
            self.archive
                .write()
                .await
                .insert(format!("{} - deleted - {}", name, stamp), spec);
        }
        Ok(true)
    }

    async fn archive_spec(&self, name: &str) -> Result<bool> {
        let archived = self.specs.read().await.get(name).cloned();
        if let Some(spec) = archived {
            let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3f");
            self.archive
                .write()
                .await
                .insert(format!("{} - {}", name, stamp), spec);
        }
        Ok(true)
    }
}
