// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Token matching strategies.
//!
//! One strategy per [`FlagType`], each reduced to a single per-token
//! predicate; [`TokenGrader::grade_tokens`] is the shared routine that
//! walks the submission, reuses previously correct answers, and applies
//! the predicate to everything else.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tracing::debug;

use gauntlet_model::{FlagType, ProblemContext, ProblemFlag, Token, TokenSpec, TokenStatus};

use crate::command::{CommandRunner, render_args};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Matching strategy selected by a flag's [`FlagType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Normalized equality.
    Match,
    /// Every expected fragment is a substring of the submission.
    MatchAll,
    /// Submission equals one of the expected alternatives.
    MatchAny,
    /// An external command produces the comparison value.
    MatchOutput,
    /// Equality after stripping non-alphanumeric ASCII.
    MatchAlphaNumeric,
}

impl From<FlagType> for Strategy {
    fn from(flag_type: FlagType) -> Self {
        match flag_type {
            FlagType::Match => Strategy::Match,
            FlagType::MatchAll => Strategy::MatchAll,
            FlagType::MatchAny => Strategy::MatchAny,
            FlagType::MatchOutput => Strategy::MatchOutput,
            FlagType::MatchAlphaNumeric => Strategy::MatchAlphaNumeric,
        }
    }
}

impl Strategy {
    /// Whether submitted tokens are unwrapped from the configured flag
    /// wrapper before grading. Output payloads are not user-typed flags,
    /// so [`Strategy::MatchOutput`] skips unwrapping.
    pub fn unwraps(&self) -> bool {
        !matches!(self, Strategy::MatchOutput)
    }
}

/// Scores one submission against the bound flag of a problem context.
pub struct TokenGrader<'a> {
    /// Engine configuration (command template, timeouts).
    pub config: &'a EngineConfig,
    /// External command capability for [`Strategy::MatchOutput`].
    pub runner: &'a dyn CommandRunner,
    /// The problem being graded; the flag must already be bound.
    pub context: &'a ProblemContext,
    /// Active strategy.
    pub strategy: Strategy,
    /// Compiled flag-wrapper pattern.
    pub wrapper: &'a Regex,
}

impl TokenGrader<'_> {
    /// Grade every position of a submission.
    ///
    /// Fails when the flag declares no tokens or the submitted count does
    /// not match the expected count. Positions already recorded Correct are
    /// reused verbatim; for multi-stage challenges grading stops after the
    /// first newly graded token.
    pub async fn grade_tokens(&self, problem_flag: &ProblemFlag) -> Result<GradingResult> {
        let flag = self
            .context
            .flag
            .as_ref()
            .ok_or(EngineError::TokenSpecNotFound)?;

        if flag.tokens.is_empty() {
            return Err(EngineError::Grading(format!(
                "No tokens defined. Problem Id: {}",
                self.context.problem.id
            )));
        }

        if problem_flag.tokens.len() != flag.tokens.len() {
            return Err(EngineError::Grading(format!(
                "The number of tokens submitted is not the same as the number of tokens \
                 for the challenge. Submitted token: {} - Problem Id: {}",
                problem_flag.tokens.join(" "),
                self.context.problem.id
            )));
        }

        let timestamp = Utc::now();
        let single_token = flag.tokens.len() == 1;

        let mut graded = Vec::with_capacity(flag.tokens.len());

        for (index, submitted) in problem_flag.tokens.iter().enumerate() {
            if let Some(existing) = self.existing_correct(index) {
                graded.push(existing.clone());
                continue;
            }

            let token = if self.strategy.unwraps() {
                unwrap_token(self.wrapper, submitted)
            } else {
                submitted.clone()
            };

            let spec = &flag.tokens[index];
            let matched = self.grade_token(spec, &token).await?;

            let percent = match (matched, single_token) {
                (true, true) => 100,
                (true, false) => spec.percent,
                (false, _) => 0,
            };

            graded.push(Token {
                value: Some(token),
                percent,
                status: if matched {
                    TokenStatus::Correct
                } else {
                    TokenStatus::Incorrect
                },
                timestamp: Some(timestamp),
                index: Some(index),
                label: None,
            });

            if self.context.spec.is_multi_stage {
                // one new answer per submission; later stages stay ungraded
                break;
            }
        }

        graded.sort_by_key(|t| t.index);

        Ok(GradingResult {
            graded_tokens: graded,
        })
    }

    /// Evaluate the strategy predicate for one token.
    pub async fn grade_token(&self, spec: &TokenSpec, token: &str) -> Result<bool> {
        match self.strategy {
            Strategy::Match => Ok(normalize(&spec.value) == normalize(token)),
            Strategy::MatchAny => {
                let token = normalize(token);
                Ok(normalize(&spec.value).split('|').any(|v| v == token))
            }
            Strategy::MatchAll => {
                let token = normalize(token);
                Ok(normalize(&spec.value).split('|').all(|v| token.contains(v)))
            }
            Strategy::MatchAlphaNumeric => {
                Ok(normalize(&alphanumeric(&spec.value)) == normalize(&alphanumeric(token)))
            }
            Strategy::MatchOutput => self.grade_by_output(spec, token).await,
        }
    }

    /// A token recorded Correct by a prior submission is never re-graded.
    fn existing_correct(&self, index: usize) -> Option<&Token> {
        self.context.problem_state.tokens.iter().find(|t| {
            t.index == Some(index) && t.status == TokenStatus::Correct && t.timestamp.is_some()
        })
    }

    async fn grade_by_output(&self, spec: &TokenSpec, token: &str) -> Result<bool> {
        let flag = self.context.flag.as_ref().expect("flag bound by caller");

        let command = match flag.grade_command.as_deref() {
            Some(cmd) if !cmd.is_empty() => cmd,
            _ => return Err(EngineError::GradeCommandEmpty),
        };

        let folder = Path::new(&self.context.problem_folder);
        tokio::fs::create_dir_all(folder).await?;
        tokio::fs::write(folder.join(&flag.grade_input_flag), token).await?;

        if !flag.grade_input_file.is_empty()
            && let Some(data) = &flag.grade_input_data
        {
            tokio::fs::write(folder.join(&flag.grade_input_file), data).await?;
        }

        let args = render_args(
            &self.config.command_args,
            &self.context.challenge_folder,
            &self.context.problem_folder,
            flag.grade_image.as_deref().unwrap_or_default(),
            command,
        );
        debug!(?args, "running grade command");

        let timeout = if flag.grade_command_timeout > 0 {
            Duration::from_secs(flag.grade_command_timeout as u64)
        } else {
            Duration::from_secs(self.config.max_script_seconds)
        };

        let outcome = self.runner.run(&self.config.command, &args, timeout).await?;
        if outcome.timed_out {
            return Err(EngineError::GradingTimeout);
        }

        let output = folder.join(&flag.grade_output_file);
        match tokio::fs::read_to_string(&output).await {
            Ok(contents) => Ok(normalize(&contents) == normalize(&spec.value)),
            Err(_) => Ok(false),
        }
    }
}

/// Graded tokens for one submission pass.
#[derive(Debug, Clone, Default)]
pub struct GradingResult {
    /// Tokens graded this pass, ordered by index.
    pub graded_tokens: Vec<Token>,
}

impl GradingResult {
    /// Full credit: percents of Correct tokens sum to exactly 100.
    pub fn success(&self) -> bool {
        self.correct_percent() == 100.0
    }

    /// Percent sum of Correct tokens.
    pub fn correct_percent(&self) -> f64 {
        self.percent_where(TokenStatus::Correct)
    }

    /// Percent sum of Incorrect tokens.
    pub fn incorrect_percent(&self) -> f64 {
        self.percent_where(TokenStatus::Incorrect)
    }

    fn percent_where(&self, status: TokenStatus) -> f64 {
        self.graded_tokens
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.percent as f64)
            .sum()
    }
}

/// Strip spaces, trim, lowercase. Applied to both sides of every
/// comparison.
pub fn normalize(value: &str) -> String {
    value.replace(' ', "").trim().to_lowercase()
}

/// Keep only ASCII letters and digits.
pub fn alphanumeric(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Extract the payload from a wrapped flag, e.g. `flag{...}`; returns the
/// input unchanged when the wrapper does not match.
pub fn unwrap_token(wrapper: &Regex, token: &str) -> String {
    match wrapper.captures(token) {
        Some(captures) => captures
            .iter()
            .flatten()
            .last()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| token.to_string()),
        None => token.to_string(),
    }
}

/// Compile the configured wrapper pattern case-insensitively.
pub fn compile_wrapper(pattern: &str) -> Result<Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| EngineError::Other(format!("invalid flag wrapper pattern: {}", e)))
}
