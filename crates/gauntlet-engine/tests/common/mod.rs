// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for gauntlet-engine integration tests.
//!
//! Provides mock capability implementations (broker, command runner,
//! callback transport) and builders for specs, problems, and contexts.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use gauntlet_engine::broker::{DeployedWorkspace, GamespaceBroker, WorkspaceDeployment};
use gauntlet_engine::callback::CallbackTransport;
use gauntlet_engine::command::{CommandOutcome, CommandRunner};
use gauntlet_engine::config::EngineConfig;
use gauntlet_engine::error::Result;
use gauntlet_model::{
    ChallengeLink, ChallengeSpec, ClientProblem, ClientProblemFlag, FlagSpec, FlagType, Player,
    PlayerTeam, Problem, ProblemContext, ProblemFlag, ProblemState, Token, TokenSpec, TokenStatus,
};

/// Route engine tracing to the test output, honoring `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static TRACING: Once = Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Broker double: records every deployment and returns a canned result.
pub struct MockBroker {
    pub starts: Mutex<Vec<WorkspaceDeployment>>,
    pub response: DeployedWorkspace,
    pub templates: String,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
            response: DeployedWorkspace::default(),
            templates: String::new(),
        }
    }

    pub fn with_response(response: DeployedWorkspace) -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
            response,
            templates: String::new(),
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }
}

#[async_trait]
impl GamespaceBroker for MockBroker {
    async fn start_workspace(&self, deployment: &WorkspaceDeployment) -> Result<DeployedWorkspace> {
        self.starts.lock().unwrap().push(deployment.clone());
        Ok(self.response.clone())
    }

    async fn stop_workspace(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn fetch_templates(&self, _workspace_id: i64) -> Result<String> {
        Ok(self.templates.clone())
    }
}

/// Command-runner double: records invocations, optionally writes output
/// files the way a real generation/grading command would, and returns a
/// canned outcome.
pub struct ScriptedRunner {
    pub outcome: CommandOutcome,
    pub write_files: Vec<(PathBuf, String)>,
    pub invocations: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    pub fn succeeding() -> Self {
        Self {
            outcome: CommandOutcome {
                exit_code: 0,
                timed_out: false,
            },
            write_files: Vec::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            outcome: CommandOutcome {
                exit_code,
                timed_out: false,
            },
            ..Self::succeeding()
        }
    }

    pub fn timing_out() -> Self {
        Self {
            outcome: CommandOutcome {
                exit_code: -1,
                timed_out: true,
            },
            ..Self::succeeding()
        }
    }

    /// Write `contents` to `path` whenever the runner is invoked.
    pub fn writing(mut self, path: PathBuf, contents: impl Into<String>) -> Self {
        self.write_files.push((path, contents.into()));
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutcome> {
        self.invocations
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        for (path, contents) in &self.write_files {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, contents).await?;
        }

        Ok(self.outcome)
    }
}

/// Callback double that forwards every delivery to a channel so tests can
/// await them.
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<(String, String, Value)>,
}

impl ChannelCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl CallbackTransport for ChannelCallback {
    async fn post(&self, client: &str, endpoint: &str, payload: &Value) -> Result<()> {
        let _ = self
            .tx
            .send((client.to_string(), endpoint.to_string(), payload.clone()));
        Ok(())
    }
}

/// An engine config rooted in a temp directory.
pub fn test_config(root: &std::path::Path) -> EngineConfig {
    EngineConfig {
        problem_path: root.join("problems").to_string_lossy().into_owned(),
        challenge_path: root.join("challenges").to_string_lossy().into_owned(),
        iso_path: root.join("iso").to_string_lossy().into_owned(),
        download_url: "https://files.example.test".to_string(),
        max_sessions: 0,
        ..EngineConfig::default()
    }
}

pub fn token(value: &str, percent: i32) -> TokenSpec {
    TokenSpec {
        value: value.to_string(),
        percent,
        label: None,
    }
}

pub fn flag_spec(flag_type: FlagType, tokens: Vec<TokenSpec>) -> FlagSpec {
    FlagSpec {
        flag_type,
        tokens,
        ..Default::default()
    }
}

pub fn challenge_spec(slug: &str, flags: Vec<FlagSpec>) -> ChallengeSpec {
    ChallengeSpec {
        slug: slug.to_string(),
        title: format!("Challenge {}", slug),
        text: "Find the flag.".to_string(),
        flags,
        ..Default::default()
    }
}

pub fn problem(id: &str, slug: &str) -> Problem {
    Problem {
        id: id.to_string(),
        challenge_link: ChallengeLink {
            id: format!("challenge-{}", slug),
            slug: slug.to_string(),
        },
        ..Default::default()
    }
}

pub fn problem_with_team(id: &str, slug: &str, team_id: &str, players: &[&str]) -> Problem {
    Problem {
        team: Some(PlayerTeam {
            id: team_id.to_string(),
            name: format!("Team {}", team_id),
            players: players
                .iter()
                .enumerate()
                .map(|(i, name)| Player {
                    id: format!("player-{}", i),
                    name: name.to_string(),
                })
                .collect(),
        }),
        ..problem(id, slug)
    }
}

pub fn client_problem(problem: Problem) -> ClientProblem {
    ClientProblem {
        id: problem.id.clone(),
        client: "game".to_string(),
        callback_url: None,
        problem,
    }
}

pub fn submission(id: &str, submission_id: &str, count: i32, tokens: &[&str]) -> ProblemFlag {
    ProblemFlag {
        id: id.to_string(),
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        submission_id: submission_id.to_string(),
        count,
    }
}

pub fn client_submission(flag: ProblemFlag) -> ClientProblemFlag {
    ClientProblemFlag {
        id: flag.id.clone(),
        client: "game".to_string(),
        callback_url: None,
        problem_flag: flag,
    }
}

/// A generated context with a bound flag, rooted in a temp directory, the
/// way the pipeline would have left it.
pub fn generated_context(
    problem: Problem,
    spec: ChallengeSpec,
    flag: FlagSpec,
    root: &std::path::Path,
) -> ProblemContext {
    let tokens = flag
        .tokens
        .iter()
        .enumerate()
        .map(|(index, ts)| Token {
            index: Some(index),
            label: ts.label.clone(),
            percent: ts.percent,
            status: TokenStatus::Pending,
            timestamp: None,
            value: None,
        })
        .collect();

    ProblemContext {
        problem_state: ProblemState {
            id: problem.id.clone(),
            challenge_link: problem.challenge_link.clone(),
            team_id: problem.team.as_ref().map(|t| t.id.clone()),
            tokens,
            ..Default::default()
        },
        spec,
        flag: Some(flag),
        flag_index: 0,
        challenge_folder: root
            .join("challenges")
            .join(&problem.challenge_link.slug)
            .to_string_lossy()
            .into_owned(),
        problem_folder: root
            .join("problems")
            .join(&problem.id)
            .to_string_lossy()
            .into_owned(),
        iso_folder: root.join("iso").to_string_lossy().into_owned(),
        macros: Vec::new(),
        problem,
    }
}
