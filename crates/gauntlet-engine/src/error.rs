// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the gauntlet engine.
//!
//! Pipeline and grading failures are caught at the top of `spawn`/`grade`
//! and converted into terminal problem states; only queue-level validation
//! and enqueue failures reach callers as errors.

use thiserror::Error;

/// Result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// An identity, context, or other referenced item is missing.
    #[error("Item not found.")]
    NotFound,

    /// No challenge spec exists for the requested slug.
    #[error("Challenge not found.")]
    ChallengeNotFound,

    /// Token spec missing for a graded position.
    #[error("Flag not found.")]
    TokenSpecNotFound,

    /// The session pool is at capacity.
    #[error("All {0} sessions are in use. Please try again later.")]
    SessionsFull(usize),

    /// Generation command exceeded its time bound and was killed.
    #[error("Problem generation timed out.")]
    GenerationTimeout,

    /// Generation command exited non-zero or produced malformed output.
    #[error("Failed to generate problem.")]
    GenerationFailed,

    /// Grading command exceeded its time bound and was killed.
    #[error("Problem grading timed out.")]
    GradingTimeout,

    /// Grading precondition failed (token count mismatch, missing spec).
    #[error("Problem encountered during grading: {0}")]
    Grading(String),

    /// MatchOutput grading requires a grade command and none is set.
    #[error("Grade Command does not exist for this flag.")]
    GradeCommandEmpty,

    /// Mutation attempted on a finalized problem.
    #[error("A completed problem cannot be changed.")]
    ProblemComplete,

    /// Callback or broker transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}
