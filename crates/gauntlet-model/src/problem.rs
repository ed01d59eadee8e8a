// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Problem instances and flag submissions.
//!
//! A [`Problem`] is one team's instantiated attempt at a challenge. It is
//! created by the requester, immutable once submitted, and referenced (never
//! mutated) by the pipeline. A [`ProblemFlag`] is one answer submission for
//! an existing problem.

use serde::{Deserialize, Serialize};

/// One instantiated attempt at a challenge, scoped to a team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Problem {
    /// Problem identity; also the dispatch and grading key.
    pub id: String,
    /// The challenge this problem instantiates.
    pub challenge_link: ChallengeLink,
    /// Owning team, when launched from a team context.
    pub team: Option<PlayerTeam>,
    /// Pinned flag-variant index; random selection when absent.
    pub flag_index: Option<usize>,
    /// Per-instance settings supplied by the requester.
    pub settings: ProblemSettings,
    /// Isolation scope forwarded to the gamespace broker.
    pub isolation_id: Option<String>,
}

/// Reference to a challenge definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeLink {
    /// Challenge identity used for latency statistics.
    pub id: String,
    /// Spec-store lookup key.
    pub slug: String,
}

/// Requester-supplied settings for one problem instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemSettings {
    /// Submission limit; zero or negative means unlimited attempts.
    pub max_submissions: i32,
    /// Practice problems do not count toward competition scoring.
    pub is_practice: bool,
    /// Originating game, for client bookkeeping.
    pub game_id: Option<String>,
    /// Display name of the originating game.
    pub game_name: Option<String>,
    /// Originating board, for client bookkeeping.
    pub board_id: Option<String>,
    /// Display name of the originating board.
    pub board_name: Option<String>,
}

/// A team and its player roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerTeam {
    /// Team identity; used as the capacity-session key.
    pub id: String,
    /// Team display name.
    pub name: String,
    /// Roster, used for replica resolution and the player-list macro.
    pub players: Vec<Player>,
}

/// One member of a team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Player {
    /// Player identity.
    pub id: String,
    /// Player display name.
    pub name: String,
}

/// One flag submission for an existing problem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemFlag {
    /// Problem identity the submission targets.
    pub id: String,
    /// Submitted token values, in presentation order.
    pub tokens: Vec<String>,
    /// Client-assigned identity for this submission.
    pub submission_id: String,
    /// Client-tracked submission count, used for finality.
    pub count: i32,
}
