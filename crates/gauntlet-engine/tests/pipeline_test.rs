// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline integration tests: the full spawn phase sequence against mock
//! capabilities.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::*;
use gauntlet_engine::broker::{DeployedWorkspace, VmConsole};
use gauntlet_engine::capacity::CapacityController;
use gauntlet_engine::config::EngineConfig;
use gauntlet_engine::pipeline::ProblemSpawner;
use gauntlet_engine::store::{GameStore, MemoryStore};
use gauntlet_model::{
    ChallengeSpec, FlagType, ProblemStatus, TokenStatus, VmSpec, WorkspaceSpec,
};

struct Harness {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    broker: Arc<MockBroker>,
    runner: Arc<ScriptedRunner>,
    capacity: Arc<CapacityController>,
    spawner: ProblemSpawner,
}

fn build(specs: Vec<ChallengeSpec>) -> Harness {
    build_with(specs, MockBroker::new(), ScriptedRunner::succeeding(), None)
}

fn build_with(
    specs: Vec<ChallengeSpec>,
    broker: MockBroker,
    runner: ScriptedRunner,
    capacity: Option<CapacityController>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    build_configured(dir, config, specs, broker, runner, capacity)
}

fn build_configured(
    dir: TempDir,
    config: EngineConfig,
    specs: Vec<ChallengeSpec>,
    broker: MockBroker,
    runner: ScriptedRunner,
    capacity: Option<CapacityController>,
) -> Harness {
    init_tracing();

    let store = Arc::new(MemoryStore::with_specs(specs));
    let broker = Arc::new(broker);
    let runner = Arc::new(runner);
    let capacity = Arc::new(
        capacity.unwrap_or_else(|| CapacityController::new(0, config.session_minutes)),
    );

    let spawner = ProblemSpawner::new(
        config,
        store.clone(),
        broker.clone(),
        runner.clone(),
        capacity.clone(),
    );

    Harness {
        _dir: dir,
        store,
        broker,
        runner,
        capacity,
        spawner,
    }
}

#[tokio::test]
async fn spawn_reaches_ready_without_a_workspace() {
    let h = build(vec![challenge_spec(
        "demo",
        vec![flag_spec(FlagType::Match, vec![token("secret", 100)])],
    )]);

    let state = h.spawner.spawn(&problem("p-1", "demo")).await;

    assert_eq!(state.status, ProblemStatus::Ready);
    assert!(state.start.is_some());
    assert!(!state.has_gamespace);
    assert_eq!(state.tokens.len(), 1);
    assert_eq!(state.tokens[0].status, TokenStatus::Pending);
    assert!(state.text.contains("Find the flag."));

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    assert!(context.is_generated());
    assert_eq!(h.broker.start_count(), 0);
}

#[tokio::test]
async fn spawn_without_spec_reports_challenge_not_found() {
    let h = build(vec![]);

    let state = h.spawner.spawn(&problem("p-1", "missing")).await;

    assert_eq!(state.status, ProblemStatus::Error);
    assert_eq!(state.text, "Challenge not found.");
}

#[tokio::test]
async fn spawn_fails_when_sessions_are_full() {
    let capacity = CapacityController::new(1, 60);
    assert!(capacity.claim_session("other-team", "adhoc", 60));

    let h = build_with(
        vec![challenge_spec(
            "demo",
            vec![flag_spec(FlagType::Match, vec![token("secret", 100)])],
        )],
        MockBroker::new(),
        ScriptedRunner::succeeding(),
        Some(capacity),
    );

    let state = h
        .spawner
        .spawn(&problem_with_team("p-1", "demo", "team-1", &["alice"]))
        .await;

    assert_eq!(state.status, ProblemStatus::Error);
    assert_eq!(
        state.text,
        "All 1 sessions are in use. Please try again later."
    );
}

#[tokio::test]
async fn pinned_flag_index_is_honored() {
    let h = build(vec![challenge_spec(
        "demo",
        vec![
            flag_spec(FlagType::Match, vec![token("variant-zero", 100)]),
            flag_spec(FlagType::Match, vec![token("variant-one", 100)]),
        ],
    )]);

    let mut p = problem("p-1", "demo");
    p.flag_index = Some(1);
    let state = h.spawner.spawn(&p).await;
    assert_eq!(state.status, ProblemStatus::Ready);

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    assert_eq!(context.flag_index, 1);
    assert_eq!(context.flag.unwrap().tokens[0].value, "variant-one");
}

#[tokio::test]
async fn reentry_skips_generation_but_redeploys() {
    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.generate_command = Some("generate.sh".to_string());
    flag.workspace = Some(WorkspaceSpec {
        id: 7,
        append_markdown: true,
        vms: vec![VmSpec {
            name: "kali".to_string(),
            replicas: 1,
            skip_iso: false,
        }],
        ..Default::default()
    });

    let broker = MockBroker::with_response(DeployedWorkspace {
        vms: vec![VmConsole {
            id: "vm-1".to_string(),
            name: "kali#t1".to_string(),
        }],
        markdown: Some("BROKER NOTES".to_string()),
    });

    let h = build_with(
        vec![challenge_spec("demo", vec![flag])],
        broker,
        ScriptedRunner::succeeding(),
        None,
    );

    let first = h.spawner.spawn(&problem("p-1", "demo")).await;
    assert_eq!(first.status, ProblemStatus::Ready);
    assert!(first.gamespace_ready);
    assert!(
        first
            .gamespace_text
            .as_deref()
            .unwrap()
            .contains("[kali](/console/vm-1/kali/")
    );
    assert_eq!(first.text.matches("BROKER NOTES").count(), 1);
    assert_eq!(h.runner.invocation_count(), 1);
    assert_eq!(h.broker.start_count(), 1);

    // a second spawn of the same problem regenerates nothing, but pushes
    // the workspace again and does not duplicate broker markdown
    let second = h.spawner.spawn(&problem("p-1", "demo")).await;
    assert_eq!(second.status, ProblemStatus::Ready);
    assert_eq!(h.runner.invocation_count(), 1);
    assert_eq!(h.broker.start_count(), 2);
    assert_eq!(second.text.matches("BROKER NOTES").count(), 1);
}

#[tokio::test]
async fn generation_timeout_surfaces_as_error_state() {
    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.generate_command = Some("generate.sh".to_string());

    let h = build_with(
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        ScriptedRunner::timing_out(),
        None,
    );

    let state = h.spawner.spawn(&problem("p-1", "demo")).await;
    assert_eq!(state.status, ProblemStatus::Error);
    assert_eq!(state.text, "Problem generation timed out.");
}

#[tokio::test]
async fn generation_nonzero_exit_surfaces_as_error_state() {
    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.generate_command = Some("generate.sh".to_string());

    let h = build_with(
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        ScriptedRunner::failing(2),
        None,
    );

    let state = h.spawner.spawn(&problem("p-1", "demo")).await;
    assert_eq!(state.status, ProblemStatus::Error);
    assert_eq!(state.text, "Failed to generate problem.");
}

#[tokio::test]
async fn generation_outputs_replace_tokens_and_extend_text() {
    let dir = TempDir::new().unwrap();
    let problem_folder = dir.path().join("problems").join("p-1");

    let runner = ScriptedRunner::succeeding()
        .writing(
            problem_folder.join(".gen_flag"),
            "- value: generated-secret\n  percent: 100\n",
        )
        .writing(problem_folder.join(".gen_text"), "Generated hint.");

    let mut flag = flag_spec(FlagType::Match, vec![token("static-secret", 100)]);
    flag.generate_command = Some("generate.sh".to_string());

    let config = test_config(dir.path());
    let h = build_configured(
        dir,
        config,
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        runner,
        None,
    );

    let state = h.spawner.spawn(&problem("p-1", "demo")).await;
    assert_eq!(state.status, ProblemStatus::Ready);
    assert!(state.text.contains("Generated hint."));

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    assert_eq!(context.flag.unwrap().tokens[0].value, "generated-secret");
}

#[tokio::test]
async fn raw_generation_output_becomes_a_single_token() {
    let dir = TempDir::new().unwrap();
    let problem_folder = dir.path().join("problems").join("p-1");

    let runner = ScriptedRunner::succeeding()
        .writing(problem_folder.join(".gen_flag"), ": not yaml token specs :");

    let mut flag = flag_spec(FlagType::Match, vec![token("static-secret", 100)]);
    flag.generate_command = Some("generate.sh".to_string());

    let config = test_config(dir.path());
    let h = build_configured(
        dir,
        config,
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        runner,
        None,
    );

    h.spawner.spawn(&problem("p-1", "demo")).await;

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    let tokens = context.flag.unwrap().tokens;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].value, ": not yaml token specs :");
}

#[tokio::test]
async fn player_list_macro_is_substituted_into_text() {
    let mut spec = challenge_spec(
        "demo",
        vec![flag_spec(FlagType::Match, vec![token("secret", 100)])],
    );
    spec.text = "Connect as {{PlayerList}}.".to_string();

    let h = build(vec![spec]);

    let state = h
        .spawner
        .spawn(&problem_with_team("p-1", "demo", "team-1", &["Bob", "alice"]))
        .await;

    assert_eq!(state.status, ProblemStatus::Ready);
    assert!(state.text.contains("Connect as bobalice."));
}

#[tokio::test]
async fn negative_replicas_resolve_to_team_size() {
    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.workspace = Some(WorkspaceSpec {
        id: 7,
        vms: vec![VmSpec {
            name: "desktop".to_string(),
            replicas: -1,
            skip_iso: false,
        }],
        ..Default::default()
    });

    let h = build_with(
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        ScriptedRunner::succeeding(),
        None,
    );

    h.spawner
        .spawn(&problem_with_team(
            "p-1",
            "demo",
            "team-1",
            &["a", "b", "c"],
        ))
        .await;

    let starts = h.broker.starts.lock().unwrap();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].spec.vms[0].replicas, 3);
}

#[tokio::test]
async fn declared_files_resolve_by_glob_sample() {
    let dir = TempDir::new().unwrap();
    let challenge_folder = dir.path().join("challenges").join("demo");
    std::fs::create_dir_all(&challenge_folder).unwrap();
    for name in ["a.bin", "b.bin", "c.bin", "readme.txt"] {
        std::fs::write(challenge_folder.join(name), name).unwrap();
    }

    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.files = vec!["2:*.bin".to_string()];

    let config = test_config(dir.path());
    let h = build_configured(
        dir,
        config,
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        ScriptedRunner::succeeding(),
        None,
    );

    h.spawner.spawn(&problem("p-1", "demo")).await;

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    let files = context.flag.unwrap().files;
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.ends_with(".bin")));
    assert_ne!(files[0], files[1]);
    let mut sorted = files.clone();
    sorted.sort();
    assert_eq!(files, sorted);
}

#[tokio::test]
async fn declared_files_resolve_by_exact_name() {
    let dir = TempDir::new().unwrap();
    let challenge_folder = dir.path().join("challenges").join("demo");
    let nested = challenge_folder.join("nested");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(nested.join("evidence.pcap"), "pcap").unwrap();

    let mut flag = flag_spec(FlagType::Match, vec![token("secret", 100)]);
    flag.files = vec!["evidence.pcap".to_string()];

    let config = test_config(dir.path());
    let h = build_configured(
        dir,
        config,
        vec![challenge_spec("demo", vec![flag])],
        MockBroker::new(),
        ScriptedRunner::succeeding(),
        None,
    );

    h.spawner.spawn(&problem("p-1", "demo")).await;

    let context = h.store.load_context("p-1").await.unwrap().unwrap();
    let files = context.flag.unwrap().files;
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("evidence.pcap"));
}

#[tokio::test]
async fn generation_latency_is_reported_once_per_problem() {
    let h = build(vec![challenge_spec(
        "demo",
        vec![flag_spec(FlagType::Match, vec![token("secret", 100)])],
    )]);

    h.spawner.spawn(&problem("p-1", "demo")).await;
    h.spawner.spawn(&problem("p-1", "demo")).await;

    let snapshot = h.capacity.backup();
    assert_eq!(snapshot.stats.len(), 1);
    assert_eq!(snapshot.stats[0].count, 1);
    assert_eq!(snapshot.stats[0].id, "challenge-demo");
}
