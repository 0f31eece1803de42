use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a runtime task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Queue,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl Status {
    /// A task is finished once it can no longer change state.
    pub fn is_finished(self) -> bool {
        !matches!(self, Status::Queue | Status::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queue => "queue",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the four task bodies a task config declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Command,
    ReadFile,
    WriteFile,
    Http,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::ReadFile => "read_file",
            TaskType::WriteFile => "write_file",
            TaskType::Http => "http",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One element of an `items` expansion, bound as `Item` in snapshots.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub key: Value,
    pub value: Value,
}

/// Captured outcome of a command task.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub cmd: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub combined_output: String,
}

/// Captured outcome of a read_file / write_file task.
#[derive(Debug, Clone, Default)]
pub struct FileResult {
    pub path: String,
    pub text: String,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
    /// Decoded value when `read_file.format` asked for json or yaml.
    pub data: Option<Value>,
}

/// Captured outcome of an http task.
#[derive(Debug, Clone, Default)]
pub struct HttpResult {
    pub status: u16,
    pub body: String,
}

/// Mutable result slot attached to every runtime task.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub command: CommandResult,
    pub file: FileResult,
    pub http: HttpResult,
    pub input: Value,
    pub output: Value,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

/// Per-task timeout: `duration` until the child is asked to terminate, then
/// `kill_after` until it is killed outright. Zero `kill_after` skips the
/// grace window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeout {
    pub duration: Duration,
    pub kill_after: Duration,
}

/// Clock abstraction so task timestamps can be controlled in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
