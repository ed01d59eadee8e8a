// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authored challenge definitions.
//!
//! A [`ChallengeSpec`] is the static, operator-authored description of a
//! challenge: display text, one or more gradable [`FlagSpec`] variants, and
//! an optional shared [`WorkspaceSpec`] describing the VM topology. Specs
//! are owned by the spec store and loaded read-only per problem.

use serde::{Deserialize, Serialize};

/// How flags are presented to players.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagStyle {
    /// Discrete token entry fields.
    #[default]
    Token,
    /// Free-form text answer.
    Text,
}

/// Grading algorithm selector for a flag variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagType {
    /// Normalized equality against the expected value.
    #[default]
    Match,
    /// Every `|`-delimited expected fragment must appear in the submission.
    MatchAll,
    /// Submission must equal one of the `|`-delimited expected values.
    MatchAny,
    /// An external grading command produces the value to compare.
    MatchOutput,
    /// Equality after stripping all non-alphanumeric ASCII.
    MatchAlphaNumeric,
}

/// One expected sub-answer within a flag variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSpec {
    /// Expected answer value.
    pub value: String,
    /// Credit earned by matching this token. A variant with exactly one
    /// token is always worth 100 regardless of this field.
    pub percent: i32,
    /// Display label shown next to the entry field.
    pub label: Option<String>,
}

/// One gradable variant of a challenge.
///
/// A variant is selected once per problem (pinned index or random) and is
/// fixed for that problem's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlagSpec {
    /// Grading algorithm for this variant.
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    /// Expected tokens, in presentation order.
    pub tokens: Vec<TokenSpec>,
    /// Optional generation command run while materializing the problem.
    pub generate_command: Option<String>,
    /// Image the generation command runs in.
    pub generate_image: String,
    /// File the generation command writes replacement tokens to (YAML, or a
    /// single raw value).
    pub generate_output_flag: String,
    /// File the generation command writes extra display text to.
    pub generate_output_text: String,
    /// File the generation command writes an additional file list to.
    pub generate_output_file_list: String,
    /// Optional grading command for [`FlagType::MatchOutput`].
    pub grade_command: Option<String>,
    /// Image the grading command runs in.
    pub grade_image: Option<String>,
    /// Per-flag grading timeout in seconds; 0 falls back to the engine
    /// default.
    pub grade_command_timeout: i64,
    /// File the submitted token is written to for the grading command.
    pub grade_input_flag: String,
    /// Optional fixed input file name for the grading command.
    pub grade_input_file: String,
    /// Optional fixed input data written to `grade_input_file`.
    pub grade_input_data: Option<String>,
    /// File the grading command writes its verdict value to.
    pub grade_output_file: String,
    /// Workspace override; falls back to the challenge-level workspace.
    pub workspace: Option<WorkspaceSpec>,
    /// Declared file requirements: exact paths, bare filenames, or
    /// `count:glob` random-sample rules.
    pub files: Vec<String>,
    /// Name of a previously assembled ISO image, if any.
    pub iso: Option<String>,
    /// When set, the ISO is attached to VMs but not offered for download.
    pub iso_restricted: bool,
    /// Variant-specific display text appended to the challenge text.
    pub text: Option<String>,
}

impl Default for FlagSpec {
    fn default() -> Self {
        Self {
            flag_type: FlagType::default(),
            tokens: Vec::new(),
            generate_command: None,
            generate_image: "bash".to_string(),
            generate_output_flag: ".gen_flag".to_string(),
            generate_output_text: ".gen_text".to_string(),
            generate_output_file_list: ".gen_files".to_string(),
            grade_command: None,
            grade_image: None,
            grade_command_timeout: 0,
            grade_input_flag: ".grade_flag".to_string(),
            grade_input_file: ".grade_in".to_string(),
            grade_input_data: None,
            grade_output_file: ".grade_out".to_string(),
            workspace: None,
            files: Vec::new(),
            iso: None,
            iso_restricted: false,
            text: None,
        }
    }
}

/// Static definition of a challenge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeSpec {
    /// Stable identifier used to look the spec up.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Short description shown in listings.
    pub description: String,
    /// Author attribution.
    pub authors: String,
    /// Search tags.
    pub tags: String,
    /// Challenge body text presented to players.
    pub text: String,
    /// Optional reference document staged for download.
    pub document: Option<String>,
    /// Relative difficulty, operator defined.
    pub difficulty: i32,
    /// Flag presentation style.
    pub flag_style: FlagStyle,
    /// Gradable variants; one is bound per problem.
    pub flags: Vec<FlagSpec>,
    /// Shared workspace used when a variant declares none of its own.
    pub workspace: Option<WorkspaceSpec>,
    /// Tokens must be solved strictly in order, one per submission.
    pub is_multi_stage: bool,
    /// Tokens are presented as independent parts.
    pub is_multi_part: bool,
}

/// VM topology pushed to the gamespace broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSpec {
    /// Broker workspace identifier.
    pub id: i64,
    /// Optional network shaping applied to the gamespace.
    pub network: Option<NetworkSpec>,
    /// VMs to deploy.
    pub vms: Vec<VmSpec>,
    /// Fetch per-workspace template customization from the broker before
    /// deploying.
    pub customize_templates: bool,
    /// Broker template customization payload, if fetched.
    pub templates: Option<String>,
    /// ISO attached to the deployed VMs.
    pub iso: Option<String>,
    /// VM name the ISO should be attached to; empty means all.
    pub iso_target: Option<String>,
    /// Keep all VMs on one host.
    pub host_affinity: bool,
    /// Append broker-supplied markdown to the problem text after deploy.
    pub append_markdown: bool,
}

/// A single VM entry within a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmSpec {
    /// Template name within the broker workspace.
    pub name: String,
    /// Replica count; negative means one per team member.
    pub replicas: i32,
    /// Do not attach the problem ISO to this VM.
    pub skip_iso: bool,
}

/// Network shaping for a gamespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSpec {
    /// Hostnames to register.
    pub hosts: Vec<String>,
    /// Address override for the gamespace network.
    pub new_ip: Option<String>,
    /// dnsmasq configuration lines.
    pub dnsmasq: Vec<String>,
}
