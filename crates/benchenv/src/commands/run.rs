//! Run command implementation
//!
//! Provisions one task environment through the selected backend, prints the
//! resolved environment as JSON on stdout, runs the operator's command with
//! the environment exported, then tears everything down. Cleanup runs on
//! every path once provisioning has been attempted.

use crate::cli::ServiceKind;
use anyhow::{anyhow, bail, Result};
use benchenv_core::config::Settings;
use benchenv_core::database::{DatabaseBackend, PgAdmin};
use benchenv_core::docker::CliRuntime;
use benchenv_core::filesystem::FilesystemBackend;
use benchenv_core::fixture::{FixtureFetcher, ReqwestClient};
use benchenv_core::lifecycle::{LifecycleController, StateBackend};
use benchenv_core::task::Task;
use benchenv_core::webarena::WebArenaBackend;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub service: ServiceKind,
    pub category: String,
    pub task: String,
    pub task_dir: Option<PathBuf>,
    /// Program and arguments; empty means provision, print, clean up
    pub command: Vec<String>,
}

impl RunArgs {
    fn build_task(&self) -> Task {
        let task_dir = self.task_dir.clone().unwrap_or_else(|| {
            PathBuf::from("tasks")
                .join(self.service.as_str())
                .join(&self.category)
                .join(&self.task)
        });
        Task::new(self.service.as_str(), &self.category, &self.task, task_dir)
    }
}

/// Non-zero exit status of the operator's command
#[derive(Debug)]
pub struct CommandExitCode(pub i32);

impl fmt::Display for CommandExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command exited with status {}", self.0)
    }
}

impl std::error::Error for CommandExitCode {}

/// Execute the run command
#[instrument(skip(args, settings), fields(service = args.service.as_str(), category = %args.category, task = %args.task))]
pub async fn execute_run(args: RunArgs, settings: Settings) -> Result<()> {
    let task = args.build_task();
    let client = || ReqwestClient::new().map_err(|e| anyhow!(e));

    match args.service {
        ServiceKind::Filesystem => {
            let fetcher = FixtureFetcher::new(client()?, settings.fixtures);
            let backend = FilesystemBackend::new(settings.filesystem, fetcher);
            backend.initialize()?;
            provision_and_run(LifecycleController::new(backend), task, &args.command).await
        }
        ServiceKind::Postgres => {
            let fetcher = FixtureFetcher::new(client()?, settings.fixtures);
            let admin = PgAdmin::new(&settings.postgres);
            let backend = DatabaseBackend::connect(settings.postgres, admin, fetcher).await?;
            provision_and_run(LifecycleController::new(backend), task, &args.command).await
        }
        ServiceKind::Webarena => {
            let runtime = CliRuntime::with_runtime_path(settings.webarena.runtime_binary.clone());
            runtime.check_runtime_installed()?;
            let backend = WebArenaBackend::new(settings.webarena, runtime);
            provision_and_run(LifecycleController::new(backend), task, &args.command).await
        }
    }
}

async fn provision_and_run<B: StateBackend>(
    mut controller: LifecycleController<B>,
    mut task: Task,
    command: &[String],
) -> Result<()> {
    if !controller.set_up(&mut task).await {
        let report = controller.clean_up(None).await;
        if !report.success() {
            warn!("Partial resources of {} were not fully removed", task.name());
        }
        bail!("Failed to set up environment for {}", task.name());
    }

    let agent_config = serde_json::Value::Object(controller.agent_config());
    let summary = json!({
        "task": task.name(),
        "service": task.service,
        "environment": task.environment,
        "agent_config": agent_config,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let outcome = match command.split_first() {
        Some((program, rest)) => run_command(program, rest, &task, &agent_config).await,
        None => Ok(()),
    };

    let report = controller.clean_up(Some(&task)).await;
    for failure in report.failures() {
        error!(
            "Cleanup of {:?} failed: {}",
            failure.target,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    outcome?;
    if !report.success() {
        bail!("Cleanup failed for {}", task.name());
    }
    Ok(())
}

/// Environment variables handed to the operator's command
fn exported_env(task: &Task, agent_config: &serde_json::Value) -> Vec<(String, String)> {
    let mut env = vec![
        ("BENCHENV_TASK".to_string(), task.name()),
        ("BENCHENV_SERVICE".to_string(), task.service.clone()),
        ("BENCHENV_AGENT_CONFIG".to_string(), agent_config.to_string()),
    ];
    if let Some(dir) = &task.environment.test_directory {
        env.push(("FILESYSTEM_TEST_DIR".to_string(), dir.display().to_string()));
    }
    // The agent config URL carries the password; the task field does not
    let database_url = agent_config
        .get("database_url")
        .and_then(|v| v.as_str())
        .or(task.environment.database_url.as_deref());
    if let Some(url) = database_url {
        env.push(("DATABASE_URL".to_string(), url.to_string()));
    }
    if let Some(url) = &task.environment.base_url {
        env.push(("BASE_URL".to_string(), url.clone()));
    }
    env
}

async fn run_command(
    program: &str,
    args: &[String],
    task: &Task,
    agent_config: &serde_json::Value,
) -> Result<()> {
    info!("Running command for {}: {} {}", task.name(), program, args.join(" "));
    let status = tokio::process::Command::new(program)
        .args(args)
        .envs(exported_env(task, agent_config))
        .status()
        .await
        .map_err(|e| anyhow!("Failed to start '{}': {}", program, e))?;

    if status.success() {
        Ok(())
    } else {
        let code = status.code().unwrap_or(1);
        warn!("Command for {} exited with status {}", task.name(), code);
        Err(CommandExitCode(code).into())
    }
}
