// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Externally visible problem state.
//!
//! [`ProblemState`] is the status projection delivered to clients over the
//! callback channel; it is mutated only by the pipeline and the grading
//! engine. [`GradedSubmission`] wraps one grading pass.
//!
//! # Problem Status State Machine
//!
//! ```text
//!   None ──▶ Registered ──▶ Generating ──▶ Generated
//!                                              │
//!                                              ▼
//!                             Ready ◀── Deployed ◀── Deploying
//!                               │
//!                 ┌─────────────┼─────────────┐
//!                 ▼             ▼             ▼
//!              Success       Failure      Complete
//!
//!   any phase ──error──▶ Error
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::problem::ChallengeLink;

/// Lifecycle status of a problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemStatus {
    /// No work has been admitted yet.
    #[default]
    None,
    /// Admitted to the dispatch queue; generation has not started.
    Registered,
    /// Flag selection and content generation in progress.
    Generating,
    /// Content generated; not yet deployed.
    Generated,
    /// Gamespace deployment in progress.
    Deploying,
    /// Gamespace deployed; finalization pending.
    Deployed,
    /// Available to the player.
    Ready,
    /// Closed administratively; no further mutation allowed.
    Complete,
    /// Graded fully correct.
    Success,
    /// Out of submissions without full credit.
    Failure,
    /// Pipeline or grading infrastructure failure.
    Error,
}

impl ProblemStatus {
    /// Terminal statuses are never overwritten by the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Success | Self::Failure)
    }
}

/// Grading status of one token position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    /// Not yet answered correctly.
    #[default]
    Pending,
    /// Answered correctly; the recorded value never changes afterwards.
    Correct,
    /// The most recent answer at this position was wrong.
    Incorrect,
}

/// Graded outcome for one token position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Token {
    /// Submitted value, recorded only once correct.
    pub value: Option<String>,
    /// Credit carried by this position.
    pub percent: i32,
    /// Grading status.
    pub status: TokenStatus,
    /// When this position was graded.
    pub timestamp: Option<DateTime<Utc>>,
    /// Position within the flag's token list.
    pub index: Option<usize>,
    /// Display label from the token spec.
    pub label: Option<String>,
}

/// Externally visible status projection for one problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemState {
    /// Problem identity.
    pub id: String,
    /// The challenge this problem instantiates.
    pub challenge_link: ChallengeLink,
    /// Owning team identity, when any.
    pub team_id: Option<String>,
    /// Rendered challenge text, including download links.
    pub text: String,
    /// Lifecycle status.
    pub status: ProblemStatus,
    /// Percent of total credit currently earned.
    pub percent: f64,
    /// When the problem became available.
    pub start: Option<DateTime<Utc>>,
    /// When the problem was finalized.
    pub end: Option<DateTime<Utc>>,
    /// Estimated seconds until Ready, reported at admission.
    pub estimated_ready_seconds: i64,
    /// The bound flag variant declares a gamespace.
    pub has_gamespace: bool,
    /// The gamespace finished deploying.
    pub gamespace_ready: bool,
    /// Console-link markdown for the deployed VMs.
    pub gamespace_text: Option<String>,
    /// Per-position grading records, full spec ordering.
    pub tokens: Vec<Token>,
}

/// Submission outcome classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Received but not conclusively graded (or grading failed internally).
    #[default]
    Submitted,
    /// Graded fully correct.
    Passed,
    /// Graded and wrong.
    Failed,
}

/// Result of one grading pass, delivered over the callback channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradedSubmission {
    /// Problem identity.
    pub problem_id: String,
    /// Client-assigned submission identity.
    pub submission_id: String,
    /// Outcome classification.
    pub status: SubmissionStatus,
    /// When grading finished.
    pub timestamp: Option<DateTime<Utc>>,
    /// Post-grade problem state, when the problem was found.
    pub state: Option<ProblemState>,
    /// Tokens graded by this pass.
    pub tokens: Vec<Token>,
}

/// One time bucket of projected session availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionForecast {
    /// Projected instant.
    pub time: DateTime<Utc>,
    /// Seats still occupied at that instant.
    pub reserved: i32,
    /// Seats open at that instant.
    pub available: i32,
}
