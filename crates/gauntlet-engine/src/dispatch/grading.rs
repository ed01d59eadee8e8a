// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Grading queue specialization.
//!
//! Duplicate submissions for an in-flight problem are deferred and
//! resubmitted until processed, never dropped: every submission must
//! eventually be graded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gauntlet_model::{ClientProblemFlag, GradedSubmission};

use crate::callback::CallbackTransport;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchHandler, DispatchQueue, DispatchQueueConfig, DuplicatePolicy};
use crate::error::Result;
use crate::grading::Grader;

/// Handler grading one submission per item.
pub struct GradingQueueHandler {
    grader: Arc<Grader>,
}

impl GradingQueueHandler {
    /// Create a handler over the grader.
    pub fn new(grader: Arc<Grader>) -> Self {
        Self { grader }
    }
}

#[async_trait]
impl DispatchHandler for GradingQueueHandler {
    type Item = ClientProblemFlag;
    type Outcome = GradedSubmission;

    fn endpoint(&self) -> &'static str {
        "graded"
    }

    async fn process(&self, item: &ClientProblemFlag) -> Result<GradedSubmission> {
        debug!(
            problem_id = %item.problem_flag.id,
            submission_id = %item.problem_flag.submission_id,
            client = %item.client,
            "grading submission"
        );
        Ok(self.grader.grade(&item.problem_flag).await)
    }
}

/// The flag-grading dispatch queue.
pub type GradingQueue = DispatchQueue<GradingQueueHandler>;

/// Start the grading queue with its defer-and-retry duplicate policy.
pub fn grading_queue(
    grader: Arc<Grader>,
    callback: Arc<dyn CallbackTransport>,
    config: &EngineConfig,
) -> GradingQueue {
    DispatchQueue::start(
        GradingQueueHandler::new(grader),
        callback,
        DispatchQueueConfig {
            workers: config.max_queue_size,
            requeue_delay: config.requeue_delay,
            duplicate_policy: DuplicatePolicy::Retry,
            ..Default::default()
        },
    )
}
