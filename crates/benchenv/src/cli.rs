use crate::commands::restore::{execute_restore_baseline, RestoreArgs};
use crate::commands::run::{execute_run, RunArgs};
use anyhow::Result;
use benchenv_core::config::Settings;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Backend that provisions the task environment
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ServiceKind {
    /// Snapshot of a fixture directory tree
    Filesystem,
    /// Disposable PostgreSQL database
    Postgres,
    /// Containerized web application
    Webarena,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Postgres => "postgres",
            Self::Webarena => "webarena",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision one task environment, optionally run a command in it, then clean up
    Run {
        /// Backend to provision with
        #[arg(long, value_enum)]
        service: ServiceKind,
        /// Task category
        #[arg(long)]
        category: String,
        /// Task identifier within the category
        #[arg(long)]
        task: String,
        /// Directory holding the task's description and setup script
        /// (defaults to tasks/<service>/<category>/<task>)
        #[arg(long, value_name = "PATH")]
        task_dir: Option<PathBuf>,
        /// Command to run inside the provisioned environment
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Copy the last working copy of a filesystem category back over its baseline
    RestoreBaseline {
        /// Filesystem category to restore
        #[arg(long)]
        category: String,
    },
}

/// Benchmark environment provisioning
#[derive(Debug, Parser)]
#[command(name = "benchenv", version, about)]
pub struct Cli {
    /// Log format (text or json, can be set via BENCHENV_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Settings file path (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        let log_level = match self.log_level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        if std::env::var_os("BENCHENV_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            std::env::set_var(
                "RUST_LOG",
                format!("benchenv={},benchenv_core={}", log_level, log_level),
            );
        }
        benchenv_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        let settings = Settings::load(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                service,
                category,
                task,
                task_dir,
                command,
            } => {
                execute_run(
                    RunArgs {
                        service,
                        category,
                        task,
                        task_dir,
                        command,
                    },
                    settings,
                )
                .await
            }
            Commands::RestoreBaseline { category } => {
                execute_restore_baseline(RestoreArgs { category }, settings).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "benchenv",
            "run",
            "--service",
            "postgres",
            "--category",
            "chinook",
            "--task",
            "customer_data_migration",
            "--",
            "python3",
            "agent.py",
            "--verbose",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                service, command, ..
            } => {
                assert_eq!(service, ServiceKind::Postgres);
                assert_eq!(command, vec!["python3", "agent.py", "--verbose"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_service_rejected() {
        let result = Cli::try_parse_from([
            "benchenv", "run", "--service", "notion", "--category", "x", "--task", "y",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "benchenv",
            "restore-baseline",
            "--category",
            "papers",
            "--log-format",
            "json",
            "--config",
            "benchenv.toml",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("benchenv.toml")));
    }
}
