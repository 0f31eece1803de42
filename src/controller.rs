//! Pipeline controller: resolves parameters, runs phases in declaration
//! order, applies build/phase skip/fail/exit policies, and emits per-phase
//! summaries.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use colored::{ColoredString, Colorize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, PhaseConfig};
use crate::expand;
use crate::github::GitHubClient;
use crate::params::{phase_view, Params};
use crate::phase::{RuntimePhase, Scheduler};
use crate::task::{Task, TaskRunner};
use crate::types::Status;

/// Distinguishes a failed build (the build-level `fail` condition held) from
/// configuration and runtime errors; the CLI maps both to exit code 1.
#[derive(Debug, thiserror::Error)]
#[error("the build failed")]
pub struct BuildFailed;

pub struct Controller {
    pub config: Config,
    pub runner: Arc<TaskRunner>,
    pub semaphore: Option<Arc<Semaphore>>,
}

/// Final state of one phase, kept for the build-level fail condition.
struct PhaseState {
    name: String,
    meta: Value,
    status: Status,
    error: Option<String>,
    tasks: Vec<Task>,
}

impl Controller {
    pub fn new(config: Config, runner: Arc<TaskRunner>) -> Self {
        let semaphore = if config.parallelism > 0 {
            Some(Arc::new(Semaphore::new(config.parallelism as usize)))
        } else {
            None
        };
        Self {
            config,
            runner,
            semaphore,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut params = self.fetch_metadata().await?;
        params.meta = self.config.meta.clone();

        if self
            .config
            .skip
            .matches(&params.snapshot(), false)
            .context("evaluating condition.skip")?
        {
            info!("build skipped");
            return Ok(());
        }

        let mut states: Vec<PhaseState> = Vec::with_capacity(self.config.phases.len());
        for phase_cfg in &self.config.phases {
            params.phase = Some(phase_cfg.name.clone());

            // Expansion happens exactly once, against the snapshot visible at
            // phase start.
            let mut expanded = Vec::new();
            let mut expand_error = None;
            for task_cfg in &phase_cfg.tasks {
                match expand::expand(task_cfg, &params) {
                    Ok(tasks) => expanded.extend(tasks),
                    Err(e) => {
                        expand_error = Some(format!("expanding tasks: {e:#}"));
                        break;
                    }
                }
            }

            if let Some(error) = expand_error {
                self.finish_phase(
                    &mut params,
                    &mut states,
                    PhaseState {
                        name: phase_cfg.name.clone(),
                        meta: phase_cfg.meta.clone(),
                        status: Status::Failed,
                        error: Some(error),
                        tasks: vec![],
                    },
                );
                continue;
            }

            match phase_cfg.skip.matches(&params.snapshot(), false) {
                Ok(false) => {}
                Ok(true) => {
                    debug!(phase = %phase_cfg.name, "phase skipped");
                    self.finish_phase(
                        &mut params,
                        &mut states,
                        PhaseState {
                            name: phase_cfg.name.clone(),
                            meta: phase_cfg.meta.clone(),
                            status: Status::Skipped,
                            error: None,
                            tasks: vec![],
                        },
                    );
                    continue;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("phase {}: evaluating condition.skip", phase_cfg.name))
                }
            }

            let tasks: Vec<Task> = expanded
                .into_iter()
                .enumerate()
                .map(|(index, config)| Task::new(index, config))
                .collect();

            let state = if tasks.is_empty() {
                PhaseState {
                    name: phase_cfg.name.clone(),
                    meta: phase_cfg.meta.clone(),
                    status: Status::Succeeded,
                    error: None,
                    tasks,
                }
            } else {
                self.run_phase(phase_cfg, tasks, &params, &cancel).await?
            };
            self.finish_phase(&mut params, &mut states, state);

            match phase_cfg.exit.matches(&params.snapshot(), false) {
                Ok(false) => {}
                Ok(true) => {
                    debug!(phase = %phase_cfg.name, "exit condition met");
                    break;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("phase {}: evaluating condition.exit", phase_cfg.name))
                }
            }
        }

        params.phase = None;
        let any_phase_failed = states.iter().any(|state| state.status == Status::Failed);
        if self
            .config
            .fail
            .matches(&params.snapshot(), any_phase_failed)
            .context("evaluating condition.fail")?
        {
            return Err(BuildFailed.into());
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        phase_cfg: &PhaseConfig,
        tasks: Vec<Task>,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<PhaseState> {
        info!(phase = %phase_cfg.name, tasks = tasks.len(), "phase started");
        eprintln!("\n==============");
        eprintln!("= Phase: {} =", phase_cfg.name);
        eprintln!("==============");

        let (phase, receiver) = RuntimePhase::new(phase_cfg.clone(), tasks);
        let scheduler = Scheduler {
            phase: phase.clone(),
            runner: self.runner.clone(),
            semaphore: self.semaphore.clone(),
            cancel: cancel.clone(),
            params: params.clone(),
        };
        // Seed token: sets the first tick in motion.
        phase.events.push().await;
        let outcome = scheduler.run(receiver).await;
        if cancel.is_cancelled() {
            bail!("build cancelled");
        }

        let tasks = phase.tasks();
        let any_task_failed = tasks
            .iter()
            .any(|task| task.result.status == Status::Failed);
        let (status, error) = match outcome {
            Err(e) => (Status::Failed, Some(format!("{e:#}"))),
            Ok(()) => {
                let mut probe = params.clone();
                probe.phases.insert(
                    phase_cfg.name.clone(),
                    phase_view(
                        &phase_cfg.name,
                        Status::Running,
                        &phase_cfg.meta,
                        tasks.iter().map(Task::view).collect(),
                    ),
                );
                match phase_cfg.fail.matches(&probe.snapshot(), any_task_failed) {
                    Ok(true) => (Status::Failed, None),
                    Ok(false) => (Status::Succeeded, None),
                    Err(e) => (
                        Status::Failed,
                        Some(format!("evaluating condition.fail: {e:#}")),
                    ),
                }
            }
        };
        Ok(PhaseState {
            name: phase_cfg.name.clone(),
            meta: phase_cfg.meta.clone(),
            status,
            error,
            tasks,
        })
    }

    /// Record the phase's final view for later snapshots and print its
    /// result block.
    fn finish_phase(&self, params: &mut Params, states: &mut Vec<PhaseState>, state: PhaseState) {
        let views = state.tasks.iter().map(Task::view).collect();
        params.phases.insert(
            state.name.clone(),
            phase_view(&state.name, state.status, &state.meta, views),
        );
        info!(phase = %state.name, status = %state.status, "phase finished");
        print_summary(&state);
        states.push(state);
    }

    async fn fetch_metadata(&self) -> Result<Params> {
        let mut params = Params::default();
        if !self.config.pr {
            return Ok(params);
        }
        let owner = &self.config.owner;
        let repo = &self.config.repo;
        if owner.is_empty() || repo.is_empty() {
            bail!("owner and repo are required to fetch pull request metadata");
        }
        let github = GitHubClient::new(&self.config.github_token)?;
        let pr = if self.config.env.pr_number > 0 {
            Some(
                github
                    .get_pr(owner, repo, self.config.env.pr_number)
                    .await?,
            )
        } else if !self.config.env.sha.is_empty() {
            github
                .find_pr_for_commit(owner, repo, &self.config.env.sha)
                .await?
        } else {
            None
        };
        if let Some(pr) = pr {
            if let Some(number) = pr.get("number").and_then(Value::as_i64) {
                params.files = github.list_pr_files(owner, repo, number).await?;
            }
            params.pr = pr;
        }
        Ok(params)
    }
}

fn print_summary(state: &PhaseState) {
    eprintln!("\n================");
    eprintln!("= Phase Result: {} =", state.name);
    eprintln!("================");
    eprintln!("status: {}", color_status(state.status));
    if let Some(error) = &state.error {
        eprintln!("error: {error}");
    }
    let run: Vec<&Task> = state
        .tasks
        .iter()
        .filter(|task| task.result.status.is_finished() && task.result.status != Status::Skipped)
        .collect();
    if run.is_empty() {
        eprintln!("No task is run");
    }
    for task in run {
        eprintln!("task: {}", task.name());
        eprintln!("status: {}", color_status(task.result.status));
        eprintln!("exit code: {}", task.result.command.exit_code);
        if task.result.status == Status::Failed && !task.result.command.cmd.is_empty() {
            eprintln!("command: {}", task.result.command.cmd);
        }
        if let Some(error) = &task.result.error {
            eprintln!("error: {error}");
        }
        if let (Some(start), Some(end)) = (task.result.started_at, task.result.ended_at) {
            eprintln!(
                "start time: {}",
                start.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            eprintln!(
                "end time: {}",
                end.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            eprintln!("duration: {:?}", (end - start).to_std().unwrap_or_default());
        }
        if !task.result.command.combined_output.is_empty() {
            eprintln!("{}", task.result.command.combined_output);
        }
    }
}

fn color_status(status: Status) -> ColoredString {
    match status {
        Status::Succeeded => status.as_str().green(),
        Status::Failed => status.as_str().red(),
        Status::Skipped => status.as_str().yellow(),
        Status::Queue | Status::Running => status.as_str().normal(),
    }
}
