mod config;
mod controller;
mod executor;
mod expand;
mod expr;
mod file;
mod github;
mod params;
mod phase;
mod task;
mod template;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::controller::{BuildFailed, Controller};
use crate::executor::Executor;
use crate::expr::ExprEvaluator;
use crate::file::{FileReader, FileWriter};
use crate::task::TaskRunner;
use crate::types::SystemClock;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "buildflow",
    version,
    about = "Declarative build-pipeline runner driven by YAML phases and tasks"
)]
enum Cli {
    /// Run the pipeline described by the configuration file
    Run {
        /// Configuration file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Repository owner
        #[arg(long)]
        owner: Option<String>,

        /// Repository name
        #[arg(long)]
        repo: Option<String>,

        /// GitHub access token (defaults to $GITHUB_TOKEN, then $GITHUB_ACCESS_TOKEN)
        #[arg(long)]
        github_token: Option<String>,

        /// Log level (error, warn, info, debug, trace)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Generate a starter configuration file if none exists
    Init,
}

const STARTER_CONFIG: &str = "---
# Configuration of buildflow, a declarative build-pipeline runner.
pr: false
parallelism: 1
phases:
- name: main
  tasks:
  - name: hello
    command:
      command: echo hello
";

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli {
        Cli::Run {
            config,
            owner,
            repo,
            github_token,
            log_level,
        } => {
            let overrides = config::Overrides {
                owner,
                repo,
                github_token,
                log_level,
            };
            if let Err(e) = run(config.as_deref(), overrides).await {
                if e.is::<BuildFailed>() {
                    eprintln!("{}", "the build failed".red().bold());
                } else {
                    eprintln!("{} {e:#}", "error:".red().bold());
                }
                std::process::exit(1);
            }
        }
        Cli::Init => {
            if let Err(e) = init() {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn run(config_path: Option<&Path>, overrides: config::Overrides) -> Result<()> {
    let cwd = std::env::current_dir().context("resolving working directory")?;
    let path = config::find_config(config_path, &cwd)?;
    let evaluator = ExprEvaluator::new();
    let cfg = config::load(&path, &overrides, &evaluator)?;

    init_tracing(&cfg.log_level);
    tracing::debug!(
        owner = %cfg.owner,
        repo = %cfg.repo,
        config = %path.display(),
        parallelism = cfg.parallelism,
        ci = cfg.env.ci,
        is_pr = cfg.env.is_pr,
        branch = %cfg.env.branch,
        git_ref = %cfg.env.git_ref,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let runner = Arc::new(TaskRunner {
        executor: Executor,
        reader: FileReader,
        writer: FileWriter,
        http: reqwest::Client::new(),
        clock: Arc::new(SystemClock),
        working_dir: cfg.working_dir.clone(),
    });
    let controller = Controller::new(cfg, runner);
    controller.run(cancel).await
}

fn init_tracing(log_level: &str) {
    let level = if log_level.is_empty() {
        "info"
    } else {
        log_level
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("buildflow={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn init() -> Result<()> {
    for name in config::CONFIG_NAMES {
        if Path::new(name).exists() {
            return Ok(());
        }
    }
    std::fs::write(".buildflow.yaml", STARTER_CONFIG).context("writing .buildflow.yaml")?;
    Ok(())
}
