// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration with environment-variable overrides.

use std::time::Duration;

/// Engine configuration.
///
/// Defaults suit a single-node deployment with content under `_data/`;
/// every field can be overridden through a `GAUNTLET_*` environment
/// variable via [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-problem scratch folders live under this path.
    pub problem_path: String,
    /// Challenge content folders live under this path.
    pub challenge_path: String,
    /// Download-accessible folder for ISOs and staged documents.
    pub iso_path: String,
    /// Public base URL for download links woven into problem text.
    pub download_url: String,
    /// Regex capturing the flag payload inside its wrapper, e.g. `flag{(.*)}`.
    pub flag_wrapper: String,
    /// Program that hosts generation and grading commands.
    pub command: String,
    /// Argument template for `command`; `{src}`, `{dst}`, `{image}` and
    /// `{cmd}` are substituted per invocation.
    pub command_args: String,
    /// Worker-pool size per dispatch queue.
    pub max_queue_size: usize,
    /// Default time bound for external commands, in seconds.
    pub max_script_seconds: u64,
    /// Session-pool ceiling; zero disables capacity enforcement.
    pub max_sessions: usize,
    /// Default session duration in minutes; also the forecast horizon.
    pub session_minutes: i64,
    /// Delay before a deferred duplicate re-enters the worker pool.
    pub requeue_delay: Duration,
    /// Capacity snapshot location for the maintenance worker.
    pub snapshot_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            problem_path: "_data/problems".to_string(),
            challenge_path: "_data/challenges".to_string(),
            iso_path: "_data/_iso".to_string(),
            download_url: "/invalid".to_string(),
            flag_wrapper: "flag{(.*)}".to_string(),
            command: "docker".to_string(),
            command_args: "run --rm -v {src}:/src -v {dst}:/dst {image} {cmd}".to_string(),
            max_queue_size: 20,
            max_script_seconds: 300,
            max_sessions: 5,
            session_minutes: 120,
            requeue_delay: Duration::from_secs(3),
            snapshot_path: "_data/stats.json".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset.
    ///
    /// Recognized variables:
    /// - `GAUNTLET_PROBLEM_PATH`, `GAUNTLET_CHALLENGE_PATH`,
    ///   `GAUNTLET_ISO_PATH`, `GAUNTLET_DOWNLOAD_URL`
    /// - `GAUNTLET_FLAG_WRAPPER`
    /// - `GAUNTLET_COMMAND`, `GAUNTLET_COMMAND_ARGS`
    /// - `GAUNTLET_MAX_QUEUE_SIZE`, `GAUNTLET_MAX_SCRIPT_SECONDS`
    /// - `GAUNTLET_MAX_SESSIONS`, `GAUNTLET_SESSION_MINUTES`
    /// - `GAUNTLET_REQUEUE_DELAY_SECONDS`
    /// - `GAUNTLET_SNAPSHOT_PATH`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GAUNTLET_PROBLEM_PATH") {
            config.problem_path = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_CHALLENGE_PATH") {
            config.challenge_path = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_ISO_PATH") {
            config.iso_path = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_DOWNLOAD_URL") {
            config.download_url = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_FLAG_WRAPPER") {
            config.flag_wrapper = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_COMMAND") {
            config.command = v;
        }
        if let Ok(v) = std::env::var("GAUNTLET_COMMAND_ARGS") {
            config.command_args = v;
        }

        config.max_queue_size = parse_env("GAUNTLET_MAX_QUEUE_SIZE", config.max_queue_size)?;
        config.max_script_seconds =
            parse_env("GAUNTLET_MAX_SCRIPT_SECONDS", config.max_script_seconds)?;
        config.max_sessions = parse_env("GAUNTLET_MAX_SESSIONS", config.max_sessions)?;
        config.session_minutes = parse_env("GAUNTLET_SESSION_MINUTES", config.session_minutes)?;

        let requeue_secs: u64 = parse_env(
            "GAUNTLET_REQUEUE_DELAY_SECONDS",
            config.requeue_delay.as_secs(),
        )?;
        config.requeue_delay = Duration::from_secs(requeue_secs);

        if let Ok(v) = std::env::var("GAUNTLET_SNAPSHOT_PATH") {
            config.snapshot_path = v;
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, fallback: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer")),
        Err(_) => Ok(fallback),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
