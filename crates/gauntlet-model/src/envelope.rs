// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client-addressed queue envelopes.
//!
//! Each inbound request is wrapped with the originating client identity so
//! the dispatch queue can deliver the eventual result by callback. An
//! envelope is created per request and consumed exactly once.

use serde::{Deserialize, Serialize};

use crate::problem::{Problem, ProblemFlag};

/// A problem-create request paired with its origin client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientProblem {
    /// Dispatch identity; matches the problem identity.
    pub id: String,
    /// Originating client, used to address the callback.
    pub client: String,
    /// Callback address override, when the client supplies one.
    pub callback_url: Option<String>,
    /// The problem to spawn.
    pub problem: Problem,
}

/// A flag submission paired with its origin client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientProblemFlag {
    /// Dispatch identity; matches the problem identity.
    pub id: String,
    /// Originating client, used to address the callback.
    pub client: String,
    /// Callback address override, when the client supplies one.
    pub callback_url: Option<String>,
    /// The submission to grade.
    pub problem_flag: ProblemFlag,
}
