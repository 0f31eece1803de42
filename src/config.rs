//! Pipeline configuration: the YAML schema, `import` splicing, `*_file`
//! substitution, CI environment detection, and the compile step that turns
//! raw YAML into pre-compiled templates and expressions.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::expr::{BoolProgram, ExprEvaluator, Program};
use crate::file::FileFormat;
use crate::template::Template;
use crate::types::{Item, TaskType, Timeout};

/// Well-known configuration file names, searched upward from the working
/// directory when `-c` is not given.
pub const CONFIG_NAMES: [&str; 2] = [".buildflow.yaml", ".buildflow.yml"];

// ---------------------------------------------------------------------------
// Raw YAML schema (unknown fields reject the configuration)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    pr: bool,
    #[serde(default)]
    parallelism: i64,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    github_token: String,
    #[serde(default)]
    log_level: String,
    #[serde(default)]
    meta: serde_yaml::Value,
    #[serde(default)]
    condition: RawBuildCondition,
    #[serde(default)]
    phases: Vec<RawPhase>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBuildCondition {
    skip: Option<BoolOrExpr>,
    fail: Option<BoolOrExpr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPhaseCondition {
    skip: Option<BoolOrExpr>,
    exit: Option<BoolOrExpr>,
    fail: Option<BoolOrExpr>,
}

/// A condition written either as a literal bool or as an expression source.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoolOrExpr {
    Fixed(bool),
    Expr(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPhase {
    #[serde(default)]
    name: String,
    #[serde(default)]
    meta: serde_yaml::Value,
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    condition: RawPhaseCondition,
    #[serde(default)]
    import: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    #[serde(default)]
    name: String,
    #[serde(default)]
    when: Option<BoolOrExpr>,
    #[serde(default)]
    when_file: Option<String>,
    #[serde(default)]
    dependency: Option<serde_yaml::Value>,
    #[serde(default)]
    items: Option<serde_yaml::Value>,
    #[serde(default)]
    timeout: Option<RawTimeout>,
    #[serde(default)]
    meta: serde_yaml::Value,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    input_file: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    output_file: Option<String>,
    #[serde(default)]
    import: Option<String>,
    #[serde(default)]
    command: Option<RawCommand>,
    #[serde(default)]
    read_file: Option<RawReadFile>,
    #[serde(default)]
    write_file: Option<RawWriteFile>,
    #[serde(default)]
    http: Option<RawHttp>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCommand {
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    shell_options: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    command_file: Option<String>,
    #[serde(default)]
    stdin: Option<String>,
    #[serde(default)]
    stdin_file: Option<String>,
    #[serde(default)]
    env: Vec<RawEnvVar>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvVar {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    value_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimeout {
    #[serde(default)]
    duration: Option<DurationSpec>,
    #[serde(default)]
    kill_after: Option<DurationSpec>,
}

/// A duration written either as bare seconds or as "30s" / "5m" / "1h".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationSpec {
    Seconds(u64),
    Text(String),
}

impl DurationSpec {
    fn resolve(&self) -> Result<Duration> {
        match self {
            DurationSpec::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationSpec::Text(text) => parse_duration(text),
        }
    }
}

fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let (value, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => text.split_at(pos),
        None => (text, "s"),
    };
    let value: u64 = value
        .parse()
        .with_context(|| format!("invalid duration {text:?}"))?;
    let secs = match unit.trim() {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        other => bail!("invalid duration unit {other:?} in {text:?}"),
    };
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReadFile {
    path: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWriteFile {
    path: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    template_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHttp {
    url: String,
}

// ---------------------------------------------------------------------------
// Compiled configuration
// ---------------------------------------------------------------------------

/// A boolean gate: fixed, scripted, or the contextual "anything failed"
/// default used by phase-level and build-level `fail`.
#[derive(Debug, Clone)]
pub enum BoolSpec {
    Fixed(bool),
    Expr(BoolProgram),
    AnyFailed,
}

impl BoolSpec {
    /// `any_failed` resolves the `AnyFailed` default: any task failed for a
    /// phase condition, any phase failed for the build condition.
    pub fn matches(&self, params: &crate::params::Snapshot, any_failed: bool) -> Result<bool> {
        match self {
            BoolSpec::Fixed(value) => Ok(*value),
            BoolSpec::Expr(program) => program.matches(params),
            BoolSpec::AnyFailed => Ok(any_failed),
        }
    }
}

/// Task dependency: a list of task names or a readiness expression.
#[derive(Debug, Clone)]
pub enum Dependency {
    Names(Vec<String>),
    Expr(BoolProgram),
}

/// The `items` clause: a literal sequence/mapping or an expression that
/// produces one.
#[derive(Debug, Clone)]
pub enum ItemsSource {
    Literal(Value),
    Expr(Program),
}

#[derive(Debug, Clone)]
pub struct EnvVar {
    pub key: Template,
    pub value: Template,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub shell: String,
    pub shell_options: Vec<String>,
    pub command: Template,
    pub stdin: Option<Template>,
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone)]
pub struct ReadFileSpec {
    pub path: Template,
    pub format: FileFormat,
}

#[derive(Debug, Clone)]
pub struct WriteFileSpec {
    pub path: Template,
    pub template: Template,
}

#[derive(Debug, Clone)]
pub struct HttpSpec {
    pub url: String,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Command(CommandSpec),
    ReadFile(ReadFileSpec),
    WriteFile(WriteFileSpec),
    Http(HttpSpec),
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::Command(_) => TaskType::Command,
            TaskKind::ReadFile(_) => TaskType::ReadFile,
            TaskKind::WriteFile(_) => TaskType::WriteFile,
            TaskKind::Http(_) => TaskType::Http,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub name: Template,
    pub kind: TaskKind,
    pub when: BoolSpec,
    pub dependency: Option<Dependency>,
    pub items: Option<ItemsSource>,
    /// Bound during expansion; `None` for tasks without an `items` clause.
    pub item: Option<Item>,
    pub timeout: Timeout,
    pub meta: Value,
    pub input: Program,
    pub output: Program,
}

#[derive(Debug, Clone)]
pub struct PhaseConfig {
    pub name: String,
    pub meta: Value,
    pub tasks: Vec<TaskConfig>,
    pub skip: BoolSpec,
    pub exit: BoolSpec,
    pub fail: BoolSpec,
}

/// Repository coordinates collected from the CI environment.
#[derive(Debug, Clone, Default)]
pub struct CiEnv {
    pub owner: String,
    pub repo: String,
    pub pr_number: i64,
    pub branch: String,
    pub sha: String,
    pub git_ref: String,
    pub is_pr: bool,
    pub ci: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pr: bool,
    pub parallelism: i64,
    pub owner: String,
    pub repo: String,
    pub github_token: String,
    pub log_level: String,
    pub meta: Value,
    pub skip: BoolSpec,
    pub fail: BoolSpec,
    pub phases: Vec<PhaseConfig>,
    pub env: CiEnv,
    /// The config file's directory; the pipeline working directory against
    /// which relative paths resolve and in which commands run.
    pub working_dir: PathBuf,
}

/// CLI flag values layered over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub github_token: Option<String>,
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Locate the configuration file: an explicit path wins, otherwise walk from
/// `start` upward looking for the well-known names.
pub fn find_config(explicit: Option<&Path>, start: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let mut dir = start;
    loop {
        for name in CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => bail!(
                "no {} found in {} or any parent directory",
                CONFIG_NAMES[0],
                start.display()
            ),
        }
    }
}

pub fn load(path: &Path, overrides: &Overrides, evaluator: &ExprEvaluator) -> Result<Config> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut config = load_str(&text, &dir, evaluator)
        .with_context(|| format!("loading config {}", path.display()))?;

    if let Some(owner) = &overrides.owner {
        config.owner = owner.clone();
    }
    if let Some(repo) = &overrides.repo {
        config.repo = repo.clone();
    }
    if let Some(token) = &overrides.github_token {
        config.github_token = token.clone();
    }
    if let Some(level) = &overrides.log_level {
        config.log_level = level.clone();
    }
    if config.github_token.is_empty() {
        config.github_token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GITHUB_ACCESS_TOKEN"))
            .unwrap_or_default();
    }

    let env = detect_ci_env(&config.owner, &config.repo);
    if config.owner.is_empty() {
        config.owner = env.owner.clone();
    }
    if config.repo.is_empty() {
        config.repo = env.repo.clone();
    }
    config.env = env;
    Ok(config)
}

/// Parse and compile a configuration document. `dir` anchors `import` and
/// `*_file` paths and becomes the pipeline working directory.
pub fn load_str(text: &str, dir: &Path, evaluator: &ExprEvaluator) -> Result<Config> {
    let mut raw: RawConfig = serde_yaml::from_str(text).context("parsing configuration")?;
    raw.phases = splice_phase_imports(raw.phases, dir)?;
    for phase in &mut raw.phases {
        phase.tasks = splice_task_imports(std::mem::take(&mut phase.tasks), dir)?;
    }
    resolve_file_fields(&mut raw, dir)?;
    compile(raw, dir.to_path_buf(), evaluator)
}

fn resolve_path(dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        dir.join(p)
    }
}

fn splice_phase_imports(phases: Vec<RawPhase>, dir: &Path) -> Result<Vec<RawPhase>> {
    let mut out = Vec::with_capacity(phases.len());
    for phase in phases {
        match &phase.import {
            None => out.push(phase),
            Some(import) => {
                let path = resolve_path(dir, import);
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("importing phases from {}", path.display()))?;
                let imported: Vec<RawPhase> = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing imported phases {}", path.display()))?;
                out.extend(imported);
            }
        }
    }
    Ok(out)
}

fn splice_task_imports(tasks: Vec<RawTask>, dir: &Path) -> Result<Vec<RawTask>> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        match &task.import {
            None => out.push(task),
            Some(import) => {
                let path = resolve_path(dir, import);
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("importing tasks from {}", path.display()))?;
                let imported: Vec<RawTask> = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing imported tasks {}", path.display()))?;
                out.extend(imported);
            }
        }
    }
    Ok(out)
}

/// Read every `*_file` field relative to the config directory and substitute
/// its contents into the corresponding in-memory field.
fn resolve_file_fields(raw: &mut RawConfig, dir: &Path) -> Result<()> {
    for phase in &mut raw.phases {
        for task in &mut phase.tasks {
            if let Some(path) = task.when_file.take() {
                task.when = Some(BoolOrExpr::Expr(read_field_file(dir, &path, "when_file")?));
            }
            if let Some(path) = task.input_file.take() {
                task.input = Some(read_field_file(dir, &path, "input_file")?);
            }
            if let Some(path) = task.output_file.take() {
                task.output = Some(read_field_file(dir, &path, "output_file")?);
            }
            if let Some(command) = &mut task.command {
                if let Some(path) = command.command_file.take() {
                    command.command = Some(read_field_file(dir, &path, "command_file")?);
                }
                if let Some(path) = command.stdin_file.take() {
                    command.stdin = Some(read_field_file(dir, &path, "stdin_file")?);
                }
                for env in &mut command.env {
                    if let Some(path) = env.value_file.take() {
                        env.value = Some(read_field_file(dir, &path, "value_file")?);
                    }
                }
            }
            if let Some(write) = &mut task.write_file {
                if let Some(path) = write.template_file.take() {
                    write.template = Some(read_field_file(dir, &path, "template_file")?);
                }
            }
        }
    }
    Ok(())
}

fn read_field_file(dir: &Path, path: &str, field: &str) -> Result<String> {
    let resolved = resolve_path(dir, path);
    fs::read_to_string(&resolved).with_context(|| format!("reading {field} {}", resolved.display()))
}

fn detect_ci_env(owner: &str, repo: &str) -> CiEnv {
    let mut env = CiEnv {
        owner: owner.to_string(),
        repo: repo.to_string(),
        ..Default::default()
    };
    if std::env::var("GITHUB_ACTIONS").ok().as_deref() != Some("true") {
        return env;
    }
    env.ci = true;
    if let Ok(repository) = std::env::var("GITHUB_REPOSITORY") {
        if let Some((ci_owner, ci_repo)) = repository.split_once('/') {
            if env.owner.is_empty() {
                env.owner = ci_owner.to_string();
            }
            if env.repo.is_empty() {
                env.repo = ci_repo.to_string();
            }
        }
    }
    env.sha = std::env::var("GITHUB_SHA").unwrap_or_default();
    env.git_ref = std::env::var("GITHUB_REF").unwrap_or_default();
    env.branch = std::env::var("GITHUB_HEAD_REF")
        .or_else(|_| std::env::var("GITHUB_REF_NAME"))
        .unwrap_or_default();
    // Pull request refs look like refs/pull/<number>/merge.
    if let Some(number) = env
        .git_ref
        .strip_prefix("refs/pull/")
        .and_then(|rest| rest.split('/').next())
        .and_then(|n| n.parse::<i64>().ok())
    {
        env.pr_number = number;
        env.is_pr = true;
    }
    env
}

// ---------------------------------------------------------------------------
// Compile step
// ---------------------------------------------------------------------------

fn compile(raw: RawConfig, working_dir: PathBuf, evaluator: &ExprEvaluator) -> Result<Config> {
    let mut seen = HashSet::new();
    for phase in &raw.phases {
        if phase.name.is_empty() {
            bail!("every phase needs a name");
        }
        if !seen.insert(phase.name.clone()) {
            bail!("duplicate phase name: {}", phase.name);
        }
    }

    let skip = compile_bool(raw.condition.skip.as_ref(), BoolSpec::Fixed(false), evaluator)
        .context("compiling condition.skip")?;
    let fail = compile_bool(raw.condition.fail.as_ref(), BoolSpec::AnyFailed, evaluator)
        .context("compiling condition.fail")?;

    let mut phases = Vec::with_capacity(raw.phases.len());
    for raw_phase in raw.phases {
        phases.push(compile_phase(raw_phase, evaluator)?);
    }

    Ok(Config {
        pr: raw.pr,
        parallelism: raw.parallelism,
        owner: raw.owner,
        repo: raw.repo,
        github_token: raw.github_token,
        log_level: raw.log_level,
        meta: yaml_to_json(raw.meta)?,
        skip,
        fail,
        phases,
        env: CiEnv::default(),
        working_dir,
    })
}

fn compile_bool(
    raw: Option<&BoolOrExpr>,
    default: BoolSpec,
    evaluator: &ExprEvaluator,
) -> Result<BoolSpec> {
    match raw {
        None => Ok(default),
        Some(BoolOrExpr::Fixed(value)) => Ok(BoolSpec::Fixed(*value)),
        Some(BoolOrExpr::Expr(source)) => Ok(BoolSpec::Expr(evaluator.compile_bool(source)?)),
    }
}

fn compile_phase(raw: RawPhase, evaluator: &ExprEvaluator) -> Result<PhaseConfig> {
    let skip = compile_bool(raw.condition.skip.as_ref(), BoolSpec::Fixed(false), evaluator)
        .with_context(|| format!("phase {}: condition.skip", raw.name))?;
    let exit = compile_bool(raw.condition.exit.as_ref(), BoolSpec::Fixed(false), evaluator)
        .with_context(|| format!("phase {}: condition.exit", raw.name))?;
    let fail = compile_bool(raw.condition.fail.as_ref(), BoolSpec::AnyFailed, evaluator)
        .with_context(|| format!("phase {}: condition.fail", raw.name))?;

    let mut tasks = Vec::with_capacity(raw.tasks.len());
    for (index, raw_task) in raw.tasks.into_iter().enumerate() {
        tasks.push(
            compile_task(raw_task, evaluator)
                .with_context(|| format!("phase {}: task {index}", raw.name))?,
        );
    }

    Ok(PhaseConfig {
        name: raw.name,
        meta: yaml_to_json(raw.meta)?,
        tasks,
        skip,
        exit,
        fail,
    })
}

fn compile_task(raw: RawTask, evaluator: &ExprEvaluator) -> Result<TaskConfig> {
    let kind = compile_kind(&raw)?;
    let when =
        compile_bool(raw.when.as_ref(), BoolSpec::Fixed(true), evaluator).context("when")?;
    let dependency = compile_dependency(raw.dependency, evaluator)?;
    let items = compile_items(raw.items, evaluator)?;
    let timeout = match raw.timeout {
        None => Timeout::default(),
        Some(raw_timeout) => Timeout {
            duration: raw_timeout
                .duration
                .map(|d| d.resolve())
                .transpose()
                .context("timeout.duration")?
                .unwrap_or_default(),
            kill_after: raw_timeout
                .kill_after
                .map(|d| d.resolve())
                .transpose()
                .context("timeout.kill_after")?
                .unwrap_or_default(),
        },
    };
    let input = evaluator
        .compile(raw.input.as_deref().unwrap_or(""))
        .context("input")?;
    let output = evaluator
        .compile(raw.output.as_deref().unwrap_or(""))
        .context("output")?;
    Ok(TaskConfig {
        name: Template::compile(&raw.name).context("name")?,
        kind,
        when,
        dependency,
        items,
        item: None,
        timeout,
        meta: yaml_to_json(raw.meta)?,
        input,
        output,
    })
}

fn compile_kind(raw: &RawTask) -> Result<TaskKind> {
    let declared = usize::from(raw.command.is_some())
        + usize::from(raw.read_file.is_some())
        + usize::from(raw.write_file.is_some())
        + usize::from(raw.http.is_some());
    if declared != 1 {
        bail!("a task must declare exactly one of command, read_file, write_file, http");
    }
    if let Some(command) = &raw.command {
        let text = command.command.clone().unwrap_or_default();
        if text.is_empty() {
            bail!("command.command is required");
        }
        let mut env = Vec::with_capacity(command.env.len());
        for var in &command.env {
            env.push(EnvVar {
                key: Template::compile(&var.key).context("env key")?,
                value: Template::compile(var.value.as_deref().unwrap_or("")).context("env value")?,
            });
        }
        let stdin = match &command.stdin {
            Some(stdin) => Some(Template::compile(stdin).context("stdin")?),
            None => None,
        };
        return Ok(TaskKind::Command(CommandSpec {
            shell: command
                .shell
                .clone()
                .unwrap_or_else(|| "/bin/sh".to_string()),
            shell_options: command
                .shell_options
                .clone()
                .unwrap_or_else(|| vec!["-c".to_string()]),
            command: Template::compile(&text).context("command")?,
            stdin,
            env,
        }));
    }
    if let Some(read) = &raw.read_file {
        return Ok(TaskKind::ReadFile(ReadFileSpec {
            path: Template::compile(&read.path).context("read_file.path")?,
            format: FileFormat::parse(read.format.as_deref().unwrap_or(""))?,
        }));
    }
    if let Some(write) = &raw.write_file {
        return Ok(TaskKind::WriteFile(WriteFileSpec {
            path: Template::compile(&write.path).context("write_file.path")?,
            template: Template::compile(write.template.as_deref().unwrap_or(""))
                .context("write_file.template")?,
        }));
    }
    match &raw.http {
        Some(http) => Ok(TaskKind::Http(HttpSpec {
            url: http.url.clone(),
        })),
        None => bail!("a task must declare exactly one of command, read_file, write_file, http"),
    }
}

fn compile_dependency(
    raw: Option<serde_yaml::Value>,
    evaluator: &ExprEvaluator,
) -> Result<Option<Dependency>> {
    let Some(value) = raw else { return Ok(None) };
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(source) => Ok(Some(Dependency::Expr(
            evaluator.compile_bool(&source).context("dependency")?,
        ))),
        serde_yaml::Value::Sequence(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_yaml::Value::String(name) => names.push(name),
                    other => bail!("dependency entries must be task names, got {other:?}"),
                }
            }
            Ok(Some(Dependency::Names(names)))
        }
        other => bail!("dependency must be an expression or a list of task names, got {other:?}"),
    }
}

fn compile_items(
    raw: Option<serde_yaml::Value>,
    evaluator: &ExprEvaluator,
) -> Result<Option<ItemsSource>> {
    let Some(value) = raw else { return Ok(None) };
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(source) => Ok(Some(ItemsSource::Expr(
            evaluator.compile(&source).context("items")?,
        ))),
        value @ (serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_)) => {
            Ok(Some(ItemsSource::Literal(yaml_to_json(value)?)))
        }
        other => bail!("items must be an expression, a sequence, or a mapping, got {other:?}"),
    }
}

/// Convert decoded YAML into the JSON value model used by snapshots.
pub fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => bail!("mapping keys must be strings, got {other:?}"),
                };
                out.insert(key, yaml_to_json(value)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}
