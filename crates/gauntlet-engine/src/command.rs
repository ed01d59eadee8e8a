// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External command execution.
//!
//! Generation and grading commands are opaque synchronous invocations with
//! a hard time bound. [`CommandRunner`] abstracts that capability so the
//! pipeline and grading engine stay testable without real subprocesses;
//! [`ProcessRunner`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::Result;

/// Outcome of one external command invocation.
#[derive(Debug, Clone, Copy)]
pub struct CommandOutcome {
    /// Process exit code; -1 when unavailable (killed or signaled).
    pub exit_code: i32,
    /// The command exceeded its time bound and was killed.
    pub timed_out: bool,
}

/// Capability to run an external command under a time bound.
///
/// A timed-out process is always killed before the outcome is returned;
/// the caller decides what a timeout or non-zero exit means.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout`.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome>;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        debug!(%program, ?args, timeout_secs = timeout.as_secs(), "running command");

        let mut child = Command::new(program).args(args).spawn()?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                Ok(CommandOutcome {
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                })
            }
            Err(_) => {
                warn!(%program, "command exceeded time bound, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out command");
                }
                Ok(CommandOutcome {
                    exit_code: -1,
                    timed_out: true,
                })
            }
        }
    }
}

/// Render a `{src}`/`{dst}`/`{image}`/`{cmd}` argument template into an
/// argument vector.
pub fn render_args(template: &str, src: &str, dst: &str, image: &str, cmd: &str) -> Vec<String> {
    template
        .replace("{src}", src)
        .replace("{dst}", dst)
        .replace("{image}", image)
        .replace("{cmd}", cmd)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
