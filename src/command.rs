//! Shell command tasks
//!
//! The `taskfarm` binary turns every line of an input file into one task and
//! runs a command template for it on a worker. `{}` in the template is
//! replaced by the task text; a template without `{}` gets the task appended
//! as the last argument.

use crate::util::host_name;
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::Instant;

/// Placeholder replaced by the task text
pub const PLACEHOLDER: &str = "{}";

/// Result of running one command task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub task: String,
    /// Worker host that ran the command
    pub host: String,
    /// Exit code, `None` if killed by a signal or never started
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Set when the command could not be started at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Runs a command template through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRunner {
    template: String,
    shell: String,
}

impl CommandRunner {
    pub fn new(template: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            shell: shell.into(),
        }
    }

    /// Command line for one task
    pub fn render(&self, task: &str) -> String {
        if self.template.contains(PLACEHOLDER) {
            self.template.replace(PLACEHOLDER, task)
        } else {
            format!("{} {}", self.template, task)
        }
    }

    /// Run the command for `task` and capture its output
    ///
    /// Never fails: spawn errors are reported inside the outcome.
    pub fn run(&self, task: String) -> CommandOutcome {
        let command_line = self.render(&task);
        let start = Instant::now();

        let output = Command::new(&self.shell).arg("-c").arg(&command_line).output();
        let duration_ms = start.elapsed().as_millis() as u64;

        match output {
            Ok(output) => CommandOutcome {
                task,
                host: host_name(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration_ms,
                error: None,
            },
            Err(e) => CommandOutcome {
                task,
                host: host_name(),
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms,
                error: Some(format!("failed to run {}: {}", self.shell, e)),
            },
        }
    }
}

/// Parse a task file: one task per line, blank lines and `#` comments skipped
pub fn parse_task_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
