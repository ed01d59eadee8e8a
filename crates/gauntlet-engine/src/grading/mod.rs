// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission grading.
//!
//! [`Grader::grade`] scores one [`ProblemFlag`] against the flag bound to
//! its problem and decides finality: a submission is final when it earns
//! full credit, or when the submission count reaches the configured
//! maximum (for multi-stage challenges, only while the last graded token
//! is still incorrect). Internal failures never escape; the caller always
//! receives a well-formed [`GradedSubmission`].

pub mod strategy;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, warn};

use gauntlet_model::{
    GradedSubmission, ProblemContext, ProblemFlag, ProblemStatus, SubmissionStatus, Token,
    TokenStatus,
};

use crate::command::CommandRunner;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::GameStore;

pub use strategy::{GradingResult, Strategy, TokenGrader};

/// Grades flag submissions against persisted problem contexts.
pub struct Grader {
    config: EngineConfig,
    store: Arc<dyn GameStore>,
    runner: Arc<dyn CommandRunner>,
    wrapper: Regex,
}

impl Grader {
    /// Create a grader. Fails only when the configured flag wrapper is not
    /// a valid pattern.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn GameStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let wrapper = strategy::compile_wrapper(&config.flag_wrapper)?;
        Ok(Self {
            config,
            store,
            runner,
            wrapper,
        })
    }

    /// Grade one submission.
    ///
    /// Loads the problem context, runs the bound flag's strategy over the
    /// submitted tokens, applies finality rules, rebuilds the externally
    /// visible token list from the full spec ordering, and persists the
    /// updated context. Failures are logged and produce a `Submitted`
    /// status with whatever state was loaded.
    pub async fn grade(&self, flag: &ProblemFlag) -> GradedSubmission {
        debug!(problem_id = %flag.id, "grading");

        let mut context: Option<ProblemContext> = None;
        let mut result: Option<GradingResult> = None;

        if let Err(e) = self.grade_inner(flag, &mut context, &mut result).await {
            error!(error = %e, problem_id = %flag.id, "had a problem with grading");
        }

        let mut submission_status = SubmissionStatus::Submitted;

        if let (Some(context), Some(result)) = (context.as_mut(), result.as_ref()) {
            submission_status = if result.success() {
                SubmissionStatus::Passed
            } else {
                SubmissionStatus::Failed
            };

            self.finalize(context, result, flag);

            if let Err(e) = self.store.save_context(context).await {
                warn!(error = %e, problem_id = %flag.id, "failed to persist graded context");
            }
        }

        debug!(problem_id = %flag.id, "returning");

        GradedSubmission {
            problem_id: flag.id.clone(),
            submission_id: flag.submission_id.clone(),
            status: submission_status,
            timestamp: Some(Utc::now()),
            state: context.map(|c| c.problem_state),
            tokens: result.map(|r| r.graded_tokens).unwrap_or_default(),
        }
    }

    async fn grade_inner(
        &self,
        flag: &ProblemFlag,
        out_context: &mut Option<ProblemContext>,
        out_result: &mut Option<GradingResult>,
    ) -> Result<()> {
        let context = self
            .store
            .load_context(&flag.id)
            .await?
            .ok_or(EngineError::NotFound)?;
        *out_context = Some(context);
        let context = out_context.as_mut().expect("context just stored");

        if context.flag.is_none() {
            return Err(EngineError::NotFound);
        }

        if context.problem_state.status == ProblemStatus::Complete {
            return Err(EngineError::ProblemComplete);
        }

        self.save_submission(context, flag).await?;

        let strategy = Strategy::from(context.flag.as_ref().expect("flag bound").flag_type);
        let grader = TokenGrader {
            config: &self.config,
            runner: self.runner.as_ref(),
            context,
            strategy,
            wrapper: &self.wrapper,
        };

        *out_result = Some(grader.grade_tokens(flag).await?);
        Ok(())
    }

    /// Apply finality rules and rebuild the visible token list.
    fn finalize(&self, context: &mut ProblemContext, result: &GradingResult, flag: &ProblemFlag) {
        let max_submissions = context.problem.settings.max_submissions;

        // max_submissions <= 0 accepts unlimited attempts
        let out_of_attempts = if max_submissions > 0 {
            if context.spec.is_multi_stage {
                // only the last graded token's verdict counts against the cap
                let last_incorrect = result
                    .graded_tokens
                    .last()
                    .map(|t| t.status != TokenStatus::Correct)
                    .unwrap_or(false);
                last_incorrect && flag.count >= max_submissions
            } else {
                flag.count >= max_submissions
            }
        } else {
            false
        };

        let is_final = result.success() || out_of_attempts;

        if is_final {
            context.problem_state.end = Some(Utc::now());
            context.problem_state.status = if result.success() {
                ProblemStatus::Success
            } else {
                ProblemStatus::Failure
            };
        }

        context.problem_state.percent = result.correct_percent();

        let Some(flag_spec) = context.flag.as_ref() else {
            return;
        };

        // rebuild from the spec's full token ordering, Pending for any
        // index not yet correctly answered
        let single_token = flag_spec.tokens.len() == 1;
        let tokens = flag_spec
            .tokens
            .iter()
            .enumerate()
            .map(|(index, token_spec)| {
                let correct = result
                    .graded_tokens
                    .iter()
                    .find(|t| t.index == Some(index) && t.status == TokenStatus::Correct);

                Token {
                    index: Some(index),
                    label: token_spec.label.clone(),
                    percent: if single_token { 100 } else { token_spec.percent },
                    status: correct.map(|t| t.status).unwrap_or_default(),
                    timestamp: correct.and_then(|t| t.timestamp),
                    value: correct.and_then(|t| t.value.clone()),
                }
            })
            .collect();

        context.problem_state.tokens = tokens;
    }

    /// Persist the raw submission alongside the problem for audit.
    async fn save_submission(&self, context: &ProblemContext, flag: &ProblemFlag) -> Result<()> {
        let folder = Path::new(&context.problem_folder);
        tokio::fs::create_dir_all(folder).await?;
        let path = folder.join(format!("{}.json", flag.submission_id));
        tokio::fs::write(path, serde_json::to_vec(flag)?).await?;
        Ok(())
    }
}
