//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool and task source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker processes
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// File with one task per line
    pub tasks_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tasks_file: None,
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Coordinator/worker connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the coordinator listens on (port 0 picks a free port)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Coordinator address a worker connects to
    pub connect: Option<String>,
    /// Seconds the coordinator waits for all workers to connect
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: u64,
    /// Seconds to wait for launched worker processes to exit before killing them
    #[serde(default = "default_reap_timeout_secs")]
    pub reap_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            connect: None,
            accept_timeout_secs: default_accept_timeout_secs(),
            reap_timeout_secs: default_reap_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:0".to_string()
}

fn default_accept_timeout_secs() -> u64 {
    30
}

fn default_reap_timeout_secs() -> u64 {
    5
}

/// Command run for every task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Command template, `{}` is replaced by the task
    #[serde(default)]
    pub template: String,
    /// Shell used to run the template (invoked as `<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            shell: default_shell(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

/// Where and how results are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output file (stdout when unset)
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub order: ResultOrder,
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON array
    Json,
    /// One JSON object per line
    #[default]
    #[serde(rename = "jsonl")]
    #[value(name = "jsonl")]
    JsonLines,
}

/// Order of results in the output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrder {
    /// Order in which results reached the coordinator
    Arrival,
    /// Order of the input task list
    #[default]
    Task,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "taskfarm=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl fmt::Display for ResultOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultOrder::Arrival => write!(f, "arrival"),
            ResultOrder::Task => write!(f, "task"),
        }
    }
}
