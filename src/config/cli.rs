//! CLI argument parsing using clap

use super::{OutputFormat, ResultOrder};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Launch mode (default) - coordinate and spawn local worker processes
    Launch,
    /// Coordinator mode - wait for remote workers to connect
    Coordinator,
    /// Worker mode - connect to a coordinator and run tasks
    Worker,
}

/// taskfarm - run one command per task across a pool of worker processes
#[derive(Parser, Debug)]
#[command(name = "taskfarm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: launch, coordinator, or worker
    #[arg(long, value_enum, default_value = "launch")]
    pub mode: ExecutionMode,

    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// File with one task per line
    ///
    /// Not used in worker mode (the coordinator sends tasks)
    #[arg(value_name = "TASKS")]
    pub tasks_file: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Command template; `{}` is replaced by the task
    #[arg(short = 'x', long = "command")]
    pub command: Option<String>,

    /// Shell used to run commands
    #[arg(long)]
    pub shell: Option<String>,

    /// Address to listen on (launch and coordinator modes)
    #[arg(long)]
    pub bind: Option<String>,

    /// Coordinator address to connect to (worker mode)
    #[arg(long)]
    pub connect: Option<String>,

    /// Seconds to wait for all workers to connect
    #[arg(long)]
    pub accept_timeout: Option<u64>,

    /// Write results to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Result order: arrival or task
    #[arg(long, value_enum)]
    pub order: Option<ResultOrder>,

    /// Log filter (trace, debug, info, warn, error, or a directive list)
    #[arg(long, env = "TASKFARM_LOG")]
    pub log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(0) = self.workers {
            anyhow::bail!("workers must be at least 1");
        }

        if self.mode == ExecutionMode::Worker && self.tasks_file.is_some() {
            anyhow::bail!("worker mode does not take a tasks file (the coordinator sends tasks)");
        }

        if self.mode != ExecutionMode::Worker && self.connect.is_some() {
            anyhow::bail!("--connect is only valid in worker mode");
        }

        Ok(())
    }
}
