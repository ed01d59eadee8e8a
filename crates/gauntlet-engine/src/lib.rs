// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gauntlet Engine - Challenge Orchestration and Grading
//!
//! This crate is the core of gauntlet: it accepts problem-create and
//! flag-submission requests, serializes concurrent work per problem
//! identity, enforces a global capacity limit on active sessions, drives
//! each problem through a multi-phase generation/deployment pipeline,
//! grades submissions against pluggable matching strategies, and notifies
//! the requesting client of state changes by callback.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Origin Clients                               │
//! │              (game servers, practice frontends)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ create problem / submit flag            ▲ callback (updated/graded)
//!        ▼                                         │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    gauntlet-engine (This Crate)                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────┐  ┌────────────┐  │
//! │  │   Problem    │  │   Grading    │  │ Capacity  │  │Maintenance │  │
//! │  │    Queue     │  │    Queue     │  │Controller │  │  Worker    │  │
//! │  └──────┬───────┘  └──────┬───────┘  └───────────┘  └────────────┘  │
//! │         ▼                 ▼                                         │
//! │  ┌──────────────┐  ┌──────────────┐                                 │
//! │  │   Problem    │  │    Grader    │                                 │
//! │  │   Spawner    │  │ (strategies) │                                 │
//! │  └──────┬───────┘  └──────┬───────┘                                 │
//! └─────────┼─────────────────┼─────────────────────────────────────────┘
//!           │                 │
//!           ▼                 ▼
//! ┌───────────────┐  ┌───────────────┐  ┌─────────────────────────────┐
//! │  Game Store   │  │Command Runner │  │      Gamespace Broker       │
//! │ (specs + ctx) │  │ (gen/grade)   │  │   (VM start/stop/console)   │
//! └───────────────┘  └───────────────┘  └─────────────────────────────┘
//! ```
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
//!   any phase ──error──▶ Error (message carried as problem text)
//! ```
//!
//! `Registered` is set at admission time, before generation starts, so the
//! caller can display an ETA derived from the challenge's historical
//! generation latency.
//!
//! # Dispatch Semantics
//!
//! Two independent queues front the engine, each with its own worker pool
//! and active-identity set:
//!
//! | Queue | Work | Duplicate policy |
//! |-------|------|------------------|
//! | problem | generation/deployment pipeline | drop (a retried create is redundant) |
//! | grading | token grading | defer 3s and resubmit until processed |
//!
//! For one identity, no two processing passes ever run concurrently;
//! passes for different identities run in parallel up to the pool bound.
//!
//! # Grading Strategies
//!
//! | Strategy | Predicate |
//! |----------|-----------|
//! | `Match` | normalized equality |
//! | `MatchAny` | equality with any `\|`-delimited alternative |
//! | `MatchAll` | every `\|`-delimited fragment is a substring |
//! | `MatchAlphaNumeric` | equality after stripping non-alphanumeric ASCII |
//! | `MatchOutput` | external command output compared to the expected value |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables with defaults; see
//! [`config::EngineConfig::from_env`] for the `GAUNTLET_*` variable list.
//!
//! # Modules
//!
//! - [`config`]: engine configuration from environment variables
//! - [`error`]: error taxonomy shared across the engine
//! - [`store`]: spec/context storage capability and in-memory impl
//! - [`broker`]: gamespace broker capability and HTTP impl
//! - [`command`]: timed external command capability and process impl
//! - [`callback`]: callback delivery capability and HTTP impl
//! - [`capacity`]: session admission and wait-time forecasting
//! - [`dispatch`]: concurrent dispatch queues and their specializations
//! - [`pipeline`]: the problem generation/deployment state machine
//! - [`grading`]: token grading strategies and finality rules
//! - [`maintenance`]: periodic session pruning and capacity snapshots

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Error taxonomy shared across the engine.
pub mod error;

/// Spec and context storage capability, with an in-memory implementation.
pub mod store;

/// Gamespace broker capability, with an HTTP implementation.
pub mod broker;

/// Timed external command capability, with a process implementation.
pub mod command;

/// Callback delivery capability, with an HTTP implementation.
pub mod callback;

/// Session admission, latency statistics, and forecasting.
pub mod capacity;

/// Concurrent dispatch queues and their two specializations.
pub mod dispatch;

/// The problem generation/deployment pipeline.
pub mod pipeline;

/// Token grading strategies and submission finality.
pub mod grading;

/// Periodic session pruning and capacity snapshots.
pub mod maintenance;

pub use capacity::CapacityController;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use grading::Grader;
pub use pipeline::ProblemSpawner;
