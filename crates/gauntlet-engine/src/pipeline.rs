// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Problem generation and deployment pipeline.
//!
//! [`ProblemSpawner::spawn`] drives one problem through a strict phase
//! sequence: initialize the working context, claim a capacity session,
//! generate content (flag selection, macros, file hydration, generation
//! command, ISO assembly, text resolution), deploy the gamespace, and
//! finalize. Each phase is idempotent with respect to re-entry: a problem
//! whose context already carries a bound flag skips generation entirely.
//!
//! Any failure is caught at the top of `spawn` and surfaces as a terminal
//! `Error` state carrying the failure message; already-created broker
//! resources are not rolled back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use tracing::{debug, error, info};

use gauntlet_model::{
    Macro, Problem, ProblemContext, ProblemState, ProblemStatus, Token, TokenSpec, TokenStatus,
};

use crate::broker::{GamespaceBroker, WorkspaceDeployment};
use crate::capacity::CapacityController;
use crate::command::{CommandRunner, render_args};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::GameStore;

/// Sentinel that keeps broker markdown from being appended twice on
/// re-entry.
const MARKDOWN_MARKER: &str = "<!--tm doc-->";

/// Drives the problem generation/deployment state machine.
pub struct ProblemSpawner {
    config: EngineConfig,
    store: Arc<dyn GameStore>,
    broker: Arc<dyn GamespaceBroker>,
    runner: Arc<dyn CommandRunner>,
    capacity: Arc<CapacityController>,
    img_link: Regex,
}

impl ProblemSpawner {
    /// Create a spawner over the given capabilities.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn GameStore>,
        broker: Arc<dyn GamespaceBroker>,
        runner: Arc<dyn CommandRunner>,
        capacity: Arc<CapacityController>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            runner,
            capacity,
            img_link: Regex::new(r"\]\(img/").expect("static pattern"),
        }
    }

    /// Create a new instance of a problem for a team.
    ///
    /// Never fails outward: any phase error is logged and reported as an
    /// `Error` state with the failure message as text.
    pub async fn spawn(&self, problem: &Problem) -> ProblemState {
        match self.spawn_inner(problem).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, problem_id = %problem.id, "failed to spawn problem");
                ProblemState {
                    id: problem.id.clone(),
                    challenge_link: problem.challenge_link.clone(),
                    team_id: problem.team.as_ref().map(|t| t.id.clone()),
                    status: ProblemStatus::Error,
                    text: e.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn spawn_inner(&self, problem: &Problem) -> Result<ProblemState> {
        debug!(problem_id = %problem.id, "initializing");
        let mut context = self.initialize(problem).await?;

        let session_key = context
            .problem_state
            .team_id
            .clone()
            .unwrap_or_else(|| problem.id.clone());
        if !self.capacity.claim_session(&session_key, "adhoc", 0) {
            return Err(EngineError::SessionsFull(self.capacity.max_sessions()));
        }

        let started = Utc::now();
        let needs_generation = !context.is_generated();

        debug!(
            problem_id = %problem.id,
            flag_index = ?problem.flag_index,
            "generating"
        );
        self.generate(&mut context).await?;

        debug!(problem_id = %problem.id, "deploying");
        self.deploy(&mut context).await?;

        if needs_generation {
            self.capacity.report_stat(
                &problem.challenge_link.id,
                (Utc::now() - started).num_seconds(),
            );
        }

        if context.problem_state.start.is_none() {
            context.problem_state.start = Some(Utc::now());
        }

        if !context.problem_state.status.is_terminal() {
            context.problem_state.status = ProblemStatus::Ready;
        }

        self.store.save_context(&context).await?;

        Ok(context.problem_state)
    }

    /// Resolve the challenge spec, materialize working folders, register
    /// the player-list macro, and stage the reference document.
    async fn initialize(&self, problem: &Problem) -> Result<ProblemContext> {
        if problem.id.is_empty() {
            return Err(EngineError::NotFound);
        }

        let mut context = match self.store.load_context(&problem.id).await? {
            Some(context) => context,
            None => {
                let mut spec = self
                    .store
                    .get_spec(&problem.challenge_link.slug)
                    .await?
                    .ok_or(EngineError::ChallengeNotFound)?;

                if !spec.text.is_empty() {
                    spec.text.push('\n');
                }

                ProblemContext {
                    problem_state: ProblemState {
                        id: problem.id.clone(),
                        challenge_link: problem.challenge_link.clone(),
                        team_id: problem.team.as_ref().map(|t| t.id.clone()),
                        ..Default::default()
                    },
                    spec,
                    flag: None,
                    flag_index: 0,
                    challenge_folder: join_path(
                        &self.config.challenge_path,
                        &problem.challenge_link.slug,
                    ),
                    problem_folder: join_path(&self.config.problem_path, &problem.id),
                    iso_folder: self.config.iso_path.clone(),
                    macros: Vec::new(),
                    problem: problem.clone(),
                }
            }
        };

        tokio::fs::create_dir_all(&context.problem_folder).await?;
        tokio::fs::create_dir_all(&context.challenge_folder).await?;
        tokio::fs::create_dir_all(&context.iso_folder).await?;

        if !context.macros.iter().any(|m| m.key() == "{{PlayerList}}") {
            let names: Vec<String> = context
                .problem
                .team
                .as_ref()
                .map(|team| team.players.iter().map(|p| p.name.clone()).collect())
                .unwrap_or_default();
            context.macros.push(Macro::resolver("{{PlayerList}}", move || {
                let mut players = names.clone();
                if players.is_empty() {
                    players.push("anonymous".to_string());
                }
                players.sort();
                players.join("").replace(' ', "").to_lowercase()
            }));
        }

        if let Some(document) = context.spec.document.clone() {
            let src = Path::new(&context.challenge_folder).join(&document);
            let dst = Path::new(&context.iso_folder).join(&document);
            if src.exists() && !dst.exists() {
                tokio::fs::copy(&src, &dst).await?;
            }
        }

        Ok(context)
    }

    /// Bind a flag variant and materialize its content. A context that
    /// already carries a flag short-circuits straight to deployment.
    async fn generate(&self, context: &mut ProblemContext) -> Result<()> {
        if context.is_generated() {
            return Ok(());
        }

        context.problem_state.status = ProblemStatus::Generating;

        self.select_flag(context)?;
        self.apply_macros(context);
        self.fetch_templates(context).await?;
        self.hydrate_flag_files(context)?;
        self.execute_generate(context).await?;
        self.build_iso(context).await;
        self.resolve_text(context).await;

        context.problem_state.status = ProblemStatus::Generated;
        self.store.save_context(context).await?;

        Ok(())
    }

    /// Select a flag variant: the caller's pinned index when provided,
    /// else uniformly random. The selection is permanent for the problem's
    /// lifetime.
    fn select_flag(&self, context: &mut ProblemContext) -> Result<()> {
        if context.flag.is_some() {
            return Ok(());
        }

        if context.spec.flags.is_empty() {
            return Err(EngineError::GenerationFailed);
        }

        let index = match context.problem.flag_index {
            Some(index) => index,
            None => rand::thread_rng().gen_range(0..context.spec.flags.len()),
        };

        let mut flag = context
            .spec
            .flags
            .get(index)
            .cloned()
            .ok_or(EngineError::GenerationFailed)?;

        if flag.workspace.is_none() && context.spec.workspace.is_some() {
            flag.workspace = context.spec.workspace.clone();
        }

        context.problem.flag_index = Some(index);
        context.flag_index = index;
        context.problem_state.has_gamespace = flag.workspace.is_some();
        context.problem_state.tokens = flag
            .tokens
            .iter()
            .enumerate()
            .map(|(i, spec)| Token {
                index: Some(i),
                label: spec.label.clone(),
                percent: spec.percent,
                status: TokenStatus::Pending,
                timestamp: None,
                value: None,
            })
            .collect();
        context.flag = Some(flag);

        Ok(())
    }

    /// Substitute macros into the spec text and grading input, and resolve
    /// negative replica counts to one VM per team member.
    fn apply_macros(&self, context: &mut ProblemContext) {
        let substitutions: Vec<(String, String)> = context
            .macros
            .iter()
            .map(|m| (m.key().to_string(), m.value().to_string()))
            .collect();

        let flag = context.flag.as_mut().expect("flag bound");

        for (key, value) in &substitutions {
            if context.spec.text.contains(key.as_str()) {
                context.spec.text = context.spec.text.replace(key.as_str(), value);
            }
            if let Some(data) = &flag.grade_input_data
                && data.contains(key.as_str())
            {
                flag.grade_input_data = Some(data.replace(key.as_str(), value));
            }
        }

        let Some(workspace) = flag.workspace.as_mut() else {
            return;
        };

        let team_size = context
            .problem
            .team
            .as_ref()
            .map(|t| t.players.len() as i32)
            .filter(|n| *n > 0)
            .unwrap_or(1);

        for vm in &mut workspace.vms {
            if vm.replicas < 0 {
                vm.replicas = team_size;
            }
        }
    }

    /// Fetch workspace template customization from the broker, staged as a
    /// file so re-entry after a crash can still deploy it.
    async fn fetch_templates(&self, context: &mut ProblemContext) -> Result<()> {
        let Some(workspace) = context.flag.as_ref().and_then(|f| f.workspace.as_ref()) else {
            return Ok(());
        };

        if workspace.customize_templates {
            let templates = self.broker.fetch_templates(workspace.id).await?;
            let path = Path::new(&context.problem_folder).join("_templates.json");
            tokio::fs::write(path, templates).await?;
        }

        Ok(())
    }

    /// Resolve the flag's declared file list against the challenge file
    /// tree: exact path, then filename, then `count:glob` random sampling
    /// without replacement. The resolved set is sorted deterministically.
    fn hydrate_flag_files(&self, context: &mut ProblemContext) -> Result<()> {
        let flag = context.flag.as_mut().expect("flag bound");

        if flag.files.is_empty() || !Path::new(&context.challenge_folder).is_dir() {
            return Ok(());
        }

        let files: Vec<String> = walkdir::WalkDir::new(&context.challenge_folder)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect();

        let mut selected: Vec<String> = Vec::new();
        let mut rng = rand::thread_rng();

        for target in &flag.files {
            if files.iter().any(|f| f == target) {
                selected.push(target.clone());
                continue;
            }

            if let Some(by_name) = files.iter().find(|f| {
                Path::new(f)
                    .file_name()
                    .map(|name| name.to_string_lossy() == target.as_str())
                    .unwrap_or(false)
            }) {
                selected.push(by_name.clone());
                continue;
            }

            let Some((count, pattern)) = target.split_once(':') else {
                continue;
            };
            let Ok(count) = count.parse::<usize>() else {
                continue;
            };
            let Ok(pattern) = glob::Pattern::new(pattern) else {
                continue;
            };

            for _ in 0..count {
                let pool: Vec<&String> = files
                    .iter()
                    .filter(|f| pattern.matches(f) && !selected.contains(f))
                    .collect();
                if pool.is_empty() {
                    break;
                }
                selected.push(pool[rng.gen_range(0..pool.len())].clone());
            }
        }

        selected.sort();
        flag.files = selected;

        Ok(())
    }

    /// Run the optional generation command and consume its outputs:
    /// replacement tokens, extra display text, and additional files.
    async fn execute_generate(&self, context: &mut ProblemContext) -> Result<()> {
        let flag = context.flag.as_ref().expect("flag bound");

        let Some(command) = flag.generate_command.clone().filter(|c| !c.is_empty()) else {
            return Ok(());
        };

        let commands: Vec<&str> = command.split(';').collect();
        let is_sed = commands.len() == 1 && commands[0].starts_with("sed ");

        let (program, args) = if is_sed {
            // restricted single-call sed shortcut, scoped to the problem folder
            let rendered = command[4..].replace("/dst", &context.problem_folder);
            (
                "/bin/sed".to_string(),
                rendered
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            )
        } else {
            (
                self.config.command.clone(),
                render_args(
                    &self.config.command_args,
                    &context.challenge_folder,
                    &context.problem_folder,
                    &flag.generate_image,
                    &command,
                ),
            )
        };

        info!(%program, ?args, "running generation command");

        let outcome = self
            .runner
            .run(
                &program,
                &args,
                Duration::from_secs(self.config.max_script_seconds),
            )
            .await?;

        if outcome.timed_out {
            return Err(EngineError::GenerationTimeout);
        }
        if outcome.exit_code > 0 {
            return Err(EngineError::GenerationFailed);
        }

        let folder = Path::new(&context.problem_folder).to_path_buf();
        let flag = context.flag.as_mut().expect("flag bound");

        let flag_output = folder.join(&flag.generate_output_flag);
        if let Ok(data) = tokio::fs::read_to_string(&flag_output).await {
            flag.tokens = match serde_yaml::from_str::<Vec<TokenSpec>>(&data) {
                Ok(tokens) => tokens,
                Err(_) => vec![TokenSpec {
                    value: data,
                    ..Default::default()
                }],
            };
        }

        let text_output = folder.join(&flag.generate_output_text);
        if let Ok(text) = tokio::fs::read_to_string(&text_output).await {
            context.spec.text = format!("{}\n\n{}", context.spec.text, text);
        }

        let list_output = folder.join(&flag.generate_output_file_list);
        if let Ok(listing) = tokio::fs::read_to_string(&list_output).await {
            for line in listing.lines() {
                let target = line
                    .replace("/src", &context.challenge_folder)
                    .replace("/dst", &context.problem_folder);
                if Path::new(&target).is_file() && !flag.files.contains(&target) {
                    flag.files.push(target);
                }
            }
        }

        Ok(())
    }

    /// Assemble a file-backed ISO for the hydrated files. Build failure is
    /// logged and the pipeline continues without an ISO.
    async fn build_iso(&self, context: &mut ProblemContext) {
        let flag = context.flag.as_ref().expect("flag bound");

        if flag.iso.is_some() || flag.files.is_empty() {
            return;
        }

        let iso_name = format!("{}.iso", context.problem.id);
        let path = Path::new(&context.iso_folder).join(&iso_name);

        let mut args: Vec<String> = vec![
            "-J".to_string(),
            "-V".to_string(),
            format!("VOL{:X}", rand::thread_rng().r#gen::<u32>()),
            "-o".to_string(),
            path.to_string_lossy().into_owned(),
            "-graft-points".to_string(),
        ];

        for file in &flag.files {
            if let Some(name) = Path::new(file).file_name() {
                args.push(format!("{}={}", name.to_string_lossy(), file));
            }
        }

        if let Some(document) = &context.spec.document {
            let mut doc_path = Path::new(&context.challenge_folder).join(document);
            if !doc_path.exists() {
                doc_path = Path::new(&context.iso_folder).join(document);
            }
            if doc_path.exists() {
                args.push(format!("{}={}", document, doc_path.to_string_lossy()));
            }
        }

        let built = self
            .runner
            .run(
                "genisoimage",
                &args,
                Duration::from_secs(self.config.max_script_seconds),
            )
            .await;

        match built {
            Ok(outcome) if !outcome.timed_out && outcome.exit_code == 0 => {
                context.flag.as_mut().expect("flag bound").iso = Some(iso_name);
            }
            Ok(outcome) => {
                error!(
                    title = %context.spec.title,
                    exit_code = outcome.exit_code,
                    timed_out = outcome.timed_out,
                    "error building iso file"
                );
            }
            Err(e) => {
                error!(title = %context.spec.title, error = %e, "error building iso file");
            }
        }
    }

    /// Resolve final display text: download links, image-link rewriting,
    /// and the joined spec/flag text.
    async fn resolve_text(&self, context: &mut ProblemContext) {
        let mut links: Vec<String> = Vec::new();

        if let Some(document) = &context.spec.document {
            links.push(format!(
                "[PDF File]({}/{})",
                self.config.download_url, document
            ));
        }

        let flag = context.flag.as_mut().expect("flag bound");

        if let Some(iso) = &flag.iso
            && !flag.iso_restricted
        {
            let path = Path::new(&context.iso_folder).join(iso);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => display_bytes(meta.len()),
                Err(_) => String::new(),
            };
            links.push(format!(
                "[ISO File {}]({}/{})",
                size, self.config.download_url, iso
            ));
        }

        if !links.is_empty() {
            context.spec.text = format!(
                "> Download Resources: {}\n\n{}",
                links.join(" | "),
                context.spec.text
            );
        }

        let img_base = format!("]({}/img/", self.config.download_url);
        context.spec.text = self
            .img_link
            .replace_all(&context.spec.text, img_base.as_str())
            .into_owned();
        if let Some(text) = flag.text.take() {
            flag.text = Some(self.img_link.replace_all(&text, img_base.as_str()).into_owned());
        }

        context.problem_state.text = format!(
            "{}\n{}",
            context.spec.text,
            flag.text.as_deref().unwrap_or_default()
        );
    }

    /// Push the resolved workspace to the broker and record console links.
    async fn deploy(&self, context: &mut ProblemContext) -> Result<()> {
        let flag = context.flag.as_mut().expect("flag bound");

        if flag.workspace.is_none() {
            return Ok(());
        }

        context.problem_state.status = ProblemStatus::Deploying;

        let iso = flag.iso.clone();
        let workspace = flag.workspace.as_mut().expect("workspace present");

        if iso.is_some() {
            workspace.iso = iso;
        }

        let templates_path = Path::new(&context.problem_folder).join("_templates.json");
        if let Ok(templates) = tokio::fs::read_to_string(&templates_path).await {
            workspace.templates = Some(templates);
        }

        let deployment = WorkspaceDeployment {
            spec: workspace.clone(),
            isolation_id: context.problem.isolation_id.clone(),
        };

        let started = self.broker.start_workspace(&deployment).await?;

        let isolation = context.problem.isolation_id.as_deref().unwrap_or_default();
        let consoles: Vec<String> = started
            .vms
            .iter()
            .map(|vm| {
                let name = untagged(&vm.name);
                format!("[{}](/console/{}/{}/{})", name, vm.id, name, isolation)
            })
            .collect();
        context.problem_state.gamespace_text =
            Some(format!("> Gamespace Resources: {}", consoles.join(" | ")));

        if workspace.append_markdown
            && let Some(markdown) = started.markdown.as_deref().filter(|m| !m.is_empty())
            && !context.problem_state.text.contains(MARKDOWN_MARKER)
        {
            context.problem_state.text = format!(
                "{}{}\n{}",
                context.problem_state.text, markdown, MARKDOWN_MARKER
            );
        }

        context.problem_state.gamespace_ready = true;
        workspace.templates = None;
        context.problem_state.status = ProblemStatus::Deployed;

        self.store.save_context(context).await?;

        Ok(())
    }
}

fn join_path(base: &str, leaf: &str) -> String {
    Path::new(base).join(leaf).to_string_lossy().into_owned()
}

/// VM names may carry a `#tag` suffix; console links use the bare name.
fn untagged(name: &str) -> &str {
    name.split('#').next().unwrap_or(name)
}

/// Human-readable byte size for download links.
fn display_bytes(len: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = len as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", len, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
