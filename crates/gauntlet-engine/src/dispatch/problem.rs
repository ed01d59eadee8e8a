// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Problem-create queue specialization.
//!
//! Admission fires a provisional `Registered` callback carrying an ETA
//! derived from the challenge's historical generation latency; duplicate
//! create requests for an in-flight problem are dropped, since a retried
//! create is redundant once the first pass completes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gauntlet_model::{ClientProblem, ProblemState, ProblemStatus};

use crate::callback::CallbackTransport;
use crate::capacity::CapacityController;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchHandler, DispatchQueue, DispatchQueueConfig, DuplicatePolicy};
use crate::error::Result;
use crate::pipeline::ProblemSpawner;

/// Handler running the generation/deployment pipeline per request.
pub struct ProblemQueueHandler {
    spawner: Arc<ProblemSpawner>,
    capacity: Arc<CapacityController>,
}

impl ProblemQueueHandler {
    /// Create a handler over the spawner and capacity controller.
    pub fn new(spawner: Arc<ProblemSpawner>, capacity: Arc<CapacityController>) -> Self {
        Self { spawner, capacity }
    }
}

#[async_trait]
impl DispatchHandler for ProblemQueueHandler {
    type Item = ClientProblem;
    type Outcome = ProblemState;

    fn endpoint(&self) -> &'static str {
        "updated"
    }

    async fn validate(&self, item: &ClientProblem) -> Result<Option<ProblemState>> {
        let eta = self
            .capacity
            .challenge_wait_seconds(&item.problem.challenge_link.id);

        Ok(Some(ProblemState {
            id: item.id.clone(),
            challenge_link: item.problem.challenge_link.clone(),
            team_id: item.problem.team.as_ref().map(|t| t.id.clone()),
            status: ProblemStatus::Registered,
            estimated_ready_seconds: eta,
            text: if eta > 0 {
                format!("Average wait time is {} seconds", eta)
            } else {
                "Challenge is initializing...".to_string()
            },
            ..Default::default()
        }))
    }

    async fn process(&self, item: &ClientProblem) -> Result<ProblemState> {
        debug!(
            problem_id = %item.problem.id,
            client = %item.client,
            "spawning problem"
        );
        Ok(self.spawner.spawn(&item.problem).await)
    }
}

/// The problem-create dispatch queue.
pub type ProblemQueue = DispatchQueue<ProblemQueueHandler>;

/// Start the problem-create queue with its drop-on-duplicate policy.
pub fn problem_queue(
    spawner: Arc<ProblemSpawner>,
    capacity: Arc<CapacityController>,
    callback: Arc<dyn CallbackTransport>,
    config: &EngineConfig,
) -> ProblemQueue {
    DispatchQueue::start(
        ProblemQueueHandler::new(spawner, capacity),
        callback,
        DispatchQueueConfig {
            workers: config.max_queue_size,
            requeue_delay: config.requeue_delay,
            duplicate_policy: DuplicatePolicy::Drop,
            ..Default::default()
        },
    )
}
