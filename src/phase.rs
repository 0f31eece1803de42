//! Phase scheduler: owns a phase's runtime tasks, wakes on an event queue,
//! dispatches ready tasks under the parallelism semaphore, and detects
//! completion and deadlock.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::{Dependency, PhaseConfig, TaskKind};
use crate::params::{phase_view, Params, Snapshot};
use crate::task::{Task, TaskRunner};
use crate::types::Status;

/// Token channel that re-arms the scheduler after any task state change.
/// Closing drops the sender; a late pusher finds `None` and does nothing, so
/// close is idempotent and safe against racing workers.
pub struct EventQueue {
    sender: Mutex<Option<Sender<()>>>,
}

impl EventQueue {
    /// Capacity bounds outstanding tokens: one per task plus the seed.
    pub fn new(capacity: usize) -> (EventQueue, Receiver<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            EventQueue {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    pub async fn push(&self) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }

    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

/// A phase's runtime state: the post-expansion task list and its wake channel.
/// The task list is immutable in shape; slots are replaced atomically under
/// the lock so readers never see torn updates.
pub struct RuntimePhase {
    pub config: PhaseConfig,
    tasks: RwLock<Vec<Task>>,
    pub events: EventQueue,
}

impl RuntimePhase {
    pub fn new(config: PhaseConfig, tasks: Vec<Task>) -> (Arc<RuntimePhase>, Receiver<()>) {
        let (events, receiver) = EventQueue::new(tasks.len() + 1);
        (
            Arc::new(RuntimePhase {
                config,
                tasks: RwLock::new(tasks),
                events,
            }),
            receiver,
        )
    }

    fn set(&self, index: usize, task: Task) {
        self.tasks.write().unwrap()[index] = task;
    }

    fn get(&self, index: usize) -> Task {
        self.tasks.read().unwrap()[index].clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tasks whose rendered name matches; expansion may create several.
    fn by_name(&self, name: &str) -> Vec<Task> {
        self.tasks
            .read()
            .unwrap()
            .iter()
            .filter(|task| task.name() == name)
            .cloned()
            .collect()
    }

    /// Live `{Name, Status, Meta, Tasks}` view of this phase.
    pub fn view(&self, status: Status) -> Value {
        let views = self.tasks.read().unwrap().iter().map(Task::view).collect();
        phase_view(&self.config.name, status, &self.config.meta, views)
    }
}

enum TickOutcome {
    Pending,
    Complete,
    Deadlock(Vec<String>),
}

enum Dispatch {
    /// Dependencies not yet satisfied; no state change.
    NotReady,
    /// The task finished synchronously (skipped or failed before launch).
    Finished,
    /// A worker was launched; completion arrives via the event queue.
    Launched,
}

/// Drives one phase to completion.
pub struct Scheduler {
    pub phase: Arc<RuntimePhase>,
    pub runner: Arc<TaskRunner>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub cancel: CancellationToken,
    /// Base parameters: PR/Files/Meta plus the views of completed phases.
    pub params: Params,
}

impl Scheduler {
    /// Block on the event queue until the phase completes, deadlocks, or is
    /// cancelled. Returns only after every launched worker has finished.
    pub async fn run(&self, mut events: Receiver<()>) -> Result<()> {
        let watcher = {
            let phase = self.phase.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                phase.events.close();
            })
        };

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut outcome = Ok(());
        while events.recv().await.is_some() {
            match self.tick(&mut workers) {
                TickOutcome::Pending => {}
                TickOutcome::Complete => {
                    self.phase.events.close();
                    break;
                }
                TickOutcome::Deadlock(queued) => {
                    self.phase.events.close();
                    outcome = Err(anyhow!(
                        "the phase is not finished but no task is running; check task dependencies. queued tasks: {}",
                        queued.join(", ")
                    ));
                    break;
                }
            }
        }
        watcher.abort();
        for worker in workers {
            let _ = worker.await;
        }
        outcome
    }

    fn tick(&self, workers: &mut Vec<JoinHandle<()>>) -> TickOutcome {
        // A dispatch pass can finish tasks synchronously (failed dependency
        // lookup, false `when`); re-run the pass so earlier-indexed dependents
        // observe those transitions before the deadlock check.
        loop {
            let mut finished_synchronously = false;
            for index in 0..self.phase.len() {
                let task = self.phase.get(index);
                if task.result.status != Status::Queue {
                    continue;
                }
                if let Dispatch::Finished = self.dispatch(index, task, workers) {
                    finished_synchronously = true;
                }
            }
            if !finished_synchronously {
                break;
            }
        }

        let mut all_finished = true;
        let mut none_running = true;
        let mut queued = Vec::new();
        for task in self.phase.tasks() {
            if task.result.is_finished() {
                continue;
            }
            all_finished = false;
            if task.result.status == Status::Running {
                none_running = false;
                break;
            }
            queued.push(task.name().to_string());
        }
        if all_finished {
            TickOutcome::Complete
        } else if none_running {
            TickOutcome::Deadlock(queued)
        } else {
            TickOutcome::Pending
        }
    }

    /// Base parameters with the live view of this phase bound.
    fn live_params(&self) -> Params {
        let mut params = self.params.clone();
        params.phases.insert(
            self.phase.config.name.clone(),
            self.phase.view(Status::Running),
        );
        params.phase = Some(self.phase.config.name.clone());
        params
    }

    fn dispatch(&self, index: usize, mut task: Task, workers: &mut Vec<JoinHandle<()>>) -> Dispatch {
        let params = self.live_params().with_item(task.config.item.as_ref());

        if let Some(dependency) = &task.config.dependency {
            match dependency {
                Dependency::Names(names) => {
                    for name in names {
                        let dependencies = self.phase.by_name(name);
                        if dependencies.is_empty() {
                            let msg = format!("invalid dependency: task not found: {name}");
                            return self.fail(index, task, msg);
                        }
                        if dependencies.iter().any(|dep| !dep.result.is_finished()) {
                            return Dispatch::NotReady;
                        }
                    }
                }
                Dependency::Expr(program) => match program.matches(&params.snapshot()) {
                    Ok(true) => {}
                    Ok(false) => return Dispatch::NotReady,
                    Err(e) => {
                        return self.fail(index, task, format!("evaluating dependency: {e:#}"))
                    }
                },
            }
        }

        let params = params.with_task(task.view());

        match task.config.when.matches(&params.snapshot(), false) {
            Ok(true) => {}
            Ok(false) => {
                task.result.status = Status::Skipped;
                self.phase.set(index, task);
                return Dispatch::Finished;
            }
            Err(e) => return self.fail(index, task, format!("evaluating when: {e:#}")),
        }

        task.result.status = Status::Running;
        self.phase.set(index, task.clone());

        match task.config.input.run(&params.snapshot()) {
            Ok(input) => task.result.input = input,
            Err(e) => return self.fail(index, task, format!("evaluating input: {e:#}")),
        }
        let params = params.with_task(task.view());

        if let Err(e) = self.render_late_fields(&mut task, &params.snapshot()) {
            return self.fail(index, task, format!("{e:#}"));
        }
        self.phase.set(index, task.clone());

        // Worker: acquire the semaphore, run, store, extract output, re-arm
        // the scheduler.
        let phase = self.phase.clone();
        let runner = self.runner.clone();
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();
        workers.push(tokio::spawn(async move {
            let permit = match &semaphore {
                Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                None => None,
            };
            let mut result = runner.run(&cancel, &task.config).await;
            drop(permit);

            result.input = task.result.input.clone();
            result.status = if result.error.is_some() {
                Status::Failed
            } else {
                Status::Succeeded
            };
            if let Some(err) = &result.error {
                error!(
                    phase = %phase.config.name,
                    task = %task.config.name.text,
                    error = %err,
                    "task failed"
                );
            }
            task.result = result;
            phase.set(index, task.clone());

            if task.result.status == Status::Succeeded {
                let output_params = params.with_task(task.view());
                match task.config.output.run(&output_params.snapshot()) {
                    Ok(output) => task.result.output = output,
                    Err(e) => {
                        let message = format!("evaluating output: {e:#}");
                        error!(
                            phase = %phase.config.name,
                            task = %task.config.name.text,
                            error = %message,
                            "output extraction failed"
                        );
                        task.result.status = Status::Failed;
                        task.result.error = Some(message);
                    }
                }
                phase.set(index, task);
            }
            phase.events.push().await;
        }));
        Dispatch::Launched
    }

    fn fail(&self, index: usize, mut task: Task, message: String) -> Dispatch {
        error!(
            phase = %self.phase.config.name,
            task = %task.config.name.text,
            error = %message,
            "task failed"
        );
        task.result.status = Status::Failed;
        task.result.error = Some(message);
        self.phase.set(index, task);
        Dispatch::Finished
    }

    /// Render the kind-specific late-bound fields against the snapshot and
    /// resolve relative paths against the pipeline working directory.
    fn render_late_fields(&self, task: &mut Task, snapshot: &Snapshot) -> Result<()> {
        let working_dir = &self.runner.working_dir;
        match &mut task.config.kind {
            TaskKind::Command(spec) => {
                let command = spec.command.rendered(snapshot).context("rendering command")?;
                spec.command = command;
                if let Some(stdin) = spec.stdin.take() {
                    spec.stdin = Some(stdin.rendered(snapshot).context("rendering stdin")?);
                }
                for var in &mut spec.env {
                    let key = var.key.rendered(snapshot).context("rendering env key")?;
                    let value = var.value.rendered(snapshot).context("rendering env value")?;
                    var.key = key;
                    var.value = value;
                }
            }
            TaskKind::ReadFile(spec) => {
                let path = spec
                    .path
                    .rendered(snapshot)
                    .context("rendering read_file.path")?;
                spec.path = path;
                spec.path.text = resolve_against(working_dir, &spec.path.text);
            }
            TaskKind::WriteFile(spec) => {
                let path = spec
                    .path
                    .rendered(snapshot)
                    .context("rendering write_file.path")?;
                spec.path = path;
                // An empty path stays empty: the writer turns it into a
                // uniquely named temporary file.
                if !spec.path.text.is_empty() {
                    spec.path.text = resolve_against(working_dir, &spec.path.text);
                }
                let template = spec
                    .template
                    .rendered(snapshot)
                    .context("rendering write_file.template")?;
                spec.template = template;
            }
            TaskKind::Http(_) => {}
        }
        Ok(())
    }
}

fn resolve_against(dir: &Path, text: &str) -> String {
    let path = Path::new(text);
    if path.is_absolute() {
        text.to_string()
    } else {
        dir.join(path).display().to_string()
    }
}
