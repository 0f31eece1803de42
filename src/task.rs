//! Runtime tasks and the runner that executes one resolved task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{CommandSpec, TaskConfig, TaskKind};
use crate::executor::{ExecParams, Executor};
use crate::file::{FileReader, FileWriter};
use crate::types::{Clock, HttpResult, TaskResult, Timeout};

/// Applied when a task declares no timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// A task as scheduled: its (item-expanded, late-rendered) config plus the
/// mutable result slot, identified by index within the phase.
#[derive(Debug, Clone)]
pub struct Task {
    pub config: TaskConfig,
    pub result: TaskResult,
    pub index: usize,
}

impl Task {
    pub fn new(index: usize, config: TaskConfig) -> Self {
        Self {
            config,
            result: TaskResult::default(),
            index,
        }
    }

    /// The rendered task name. Before expansion this is the template source.
    pub fn name(&self) -> &str {
        &self.config.name.text
    }

    /// The read-only view bound as `Task` (and listed under `Tasks`) in
    /// parameter snapshots.
    pub fn view(&self) -> Value {
        let mut view = json!({
            "Name": self.name(),
            "Type": self.config.kind.task_type().as_str(),
            "Status": self.result.status.as_str(),
            "Meta": self.config.meta,
            "Input": self.result.input,
            "Output": self.result.output,
        });
        match &self.config.kind {
            TaskKind::Command(_) => {
                view["ExitCode"] = json!(self.result.command.exit_code);
                view["Stdout"] = json!(self.result.command.stdout);
                view["Stderr"] = json!(self.result.command.stderr);
                view["CombinedOutput"] = json!(self.result.command.combined_output);
            }
            TaskKind::ReadFile(_) | TaskKind::WriteFile(_) => {
                let file = &self.result.file;
                view["File"] = json!({
                    "Path": file.path,
                    "Text": file.text,
                    "Size": file.size,
                    "Mode": file.mode,
                    "ModTime": file.modified.map(|t| t.to_rfc3339()),
                    "IsDir": file.is_dir,
                    "Data": file.data,
                });
            }
            TaskKind::Http(_) => {
                view["HTTP"] = json!({
                    "Status": self.result.http.status,
                    "Body": self.result.http.body,
                });
            }
        }
        view
    }
}

/// Executes one resolved task and stamps its start/end times. Errors are
/// recorded on the result; the scheduler classifies them into a status.
pub struct TaskRunner {
    pub executor: Executor,
    pub reader: FileReader,
    pub writer: FileWriter,
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
    pub working_dir: PathBuf,
}

impl TaskRunner {
    pub async fn run(&self, cancel: &CancellationToken, config: &TaskConfig) -> TaskResult {
        let mut result = TaskResult {
            started_at: Some(self.clock.now()),
            ..Default::default()
        };
        match &config.kind {
            TaskKind::Command(spec) => self.run_command(cancel, config, spec, &mut result).await,
            TaskKind::ReadFile(spec) => {
                match self.reader.read(Path::new(&spec.path.text), spec.format) {
                    Ok(file) => result.file = file,
                    Err(e) => result.error = Some(format!("{e:#}")),
                }
            }
            TaskKind::WriteFile(spec) => {
                match self
                    .writer
                    .write(Path::new(&spec.path.text), &spec.template.text)
                {
                    Ok(file) => result.file = file,
                    Err(e) => result.error = Some(format!("{e:#}")),
                }
            }
            TaskKind::Http(spec) => {
                let timeout = if config.timeout.duration.is_zero() {
                    DEFAULT_TIMEOUT
                } else {
                    config.timeout.duration
                };
                self.run_http(&spec.url, timeout, &mut result).await;
            }
        }
        result.ended_at = Some(self.clock.now());
        result
    }

    async fn run_command(
        &self,
        cancel: &CancellationToken,
        config: &TaskConfig,
        spec: &CommandSpec,
        result: &mut TaskResult,
    ) {
        let timeout = Timeout {
            duration: if config.timeout.duration.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                config.timeout.duration
            },
            kill_after: config.timeout.kill_after,
        };
        let mut args = spec.shell_options.clone();
        args.push(spec.command.text.clone());
        let envs = spec
            .env
            .iter()
            .map(|var| (var.key.text.clone(), var.value.text.clone()))
            .collect();
        let params = ExecParams {
            program: spec.shell.clone(),
            args,
            working_dir: Some(self.working_dir.clone()),
            envs,
            stdin: spec.stdin.as_ref().map(|t| t.text.clone()),
            timeout,
            task_name: config.name.text.clone(),
            quiet: false,
        };
        match self.executor.run(cancel, params).await {
            Ok(command) => result.command = command,
            Err(failure) => {
                result.command = failure.result;
                result.error = Some(failure.reason);
            }
        }
    }

    async fn run_http(&self, url: &str, timeout: Duration, result: &mut TaskResult) {
        match self.fetch(url, timeout).await {
            Ok(http) => {
                let status = http.status;
                result.http = http;
                if status >= 400 {
                    result.error = Some(format!("http request returned status {status}"));
                }
            }
            Err(e) => result.error = Some(format!("{e:#}")),
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<HttpResult> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading response body of GET {url}"))?;
        Ok(HttpResult { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_str;
    use crate::expr::ExprEvaluator;
    use crate::types::SystemClock;
    use serde_json::json;

    fn runner(working_dir: &Path) -> TaskRunner {
        TaskRunner {
            executor: Executor,
            reader: FileReader,
            writer: FileWriter,
            http: reqwest::Client::new(),
            clock: Arc::new(SystemClock),
            working_dir: working_dir.to_path_buf(),
        }
    }

    fn task_config(task_yaml: &str, dir: &Path) -> TaskConfig {
        let yaml = format!("phases:\n- name: main\n  tasks:\n  - {task_yaml}\n");
        load_str(&yaml, dir, &ExprEvaluator::new()).unwrap().phases[0].tasks[0].clone()
    }

    #[tokio::test]
    async fn test_command_task_captures_output_and_times() {
        let dir = tempfile::tempdir().unwrap();
        let config = task_config("name: t\n    command:\n      command: printf out", dir.path());
        let result = runner(dir.path())
            .run(&CancellationToken::new(), &config)
            .await;
        assert!(result.error.is_none());
        assert_eq!(result.command.stdout, "out");
        let (start, end) = (result.started_at.unwrap(), result.ended_at.unwrap());
        assert!(start <= end);
    }

    #[tokio::test]
    async fn test_command_task_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = task_config("name: t\n    command:\n      command: exit 7", dir.path());
        let result = runner(dir.path())
            .run(&CancellationToken::new(), &config)
            .await;
        assert_eq!(result.command.exit_code, 7);
        assert!(result.error.as_deref().unwrap_or("").contains("7"));
    }

    #[tokio::test]
    async fn test_read_file_task_decodes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"ok": true}"#).unwrap();
        let config = task_config(
            &format!(
                "name: t\n    read_file:\n      path: {}\n      format: json",
                path.display()
            ),
            dir.path(),
        );
        let result = runner(dir.path())
            .run(&CancellationToken::new(), &config)
            .await;
        assert!(result.error.is_none());
        assert_eq!(result.file.data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_missing_file_is_recorded_as_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = task_config(
            "name: t\n    read_file:\n      path: /nonexistent/definitely-missing",
            dir.path(),
        );
        let result = runner(dir.path())
            .run(&CancellationToken::new(), &config)
            .await;
        assert!(result.error.is_some());
    }

    #[test]
    fn test_view_exposes_kind_specific_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config = task_config("name: t\n    command:\n      command: exit 0", dir.path());
        let mut task = Task::new(0, config);
        task.result.command.stdout = "some output".to_string();
        let view = task.view();
        assert_eq!(view["Name"], json!("t"));
        assert_eq!(view["Type"], json!("command"));
        assert_eq!(view["Status"], json!("queue"));
        assert_eq!(view["Stdout"], json!("some output"));
        assert!(view.get("File").is_none());
    }
}
