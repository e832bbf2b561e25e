//! Configuration validation

use super::cli::ExecutionMode;
use super::*;
use anyhow::Result;

/// Validate the effective configuration for one execution mode
pub fn validate_config(config: &Config, mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::Launch => {
            validate_run(&config.run)?;
            validate_command(&config.command)?;
        }
        ExecutionMode::Coordinator => {
            validate_run(&config.run)?;
        }
        ExecutionMode::Worker => {
            validate_command(&config.command)?;
            if config.network.connect.is_none() {
                anyhow::bail!("worker mode requires --connect or [network] connect");
            }
        }
    }

    validate_network(&config.network)?;
    Ok(())
}

/// Validate worker pool and task source
pub fn validate_run(run: &RunConfig) -> Result<()> {
    if run.workers == 0 {
        anyhow::bail!("workers must be at least 1");
    }

    match run.tasks_file {
        None => anyhow::bail!("a tasks file is required (positional TASKS or [run] tasks_file)"),
        Some(ref path) if !path.exists() => {
            anyhow::bail!("tasks file does not exist: {}", path.display())
        }
        Some(_) => Ok(()),
    }
}

/// Validate the command template
pub fn validate_command(command: &CommandConfig) -> Result<()> {
    if command.template.trim().is_empty() {
        anyhow::bail!("a command template is required (--command or [command] template)");
    }
    if command.shell.trim().is_empty() {
        anyhow::bail!("shell must not be empty");
    }
    Ok(())
}

/// Validate network settings
pub fn validate_network(network: &NetworkConfig) -> Result<()> {
    if network.bind.trim().is_empty() {
        anyhow::bail!("bind address must not be empty");
    }
    if network.accept_timeout_secs == 0 {
        anyhow::bail!("accept_timeout_secs must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_config(tasks_file: PathBuf) -> Config {
        let mut config = Config::default();
        config.run.workers = 2;
        config.run.tasks_file = Some(tasks_file);
        config.command.template = "echo {}".to_string();
        config
    }

    #[test]
    fn test_valid_launch_config() {
        let tasks = tempfile::NamedTempFile::new().unwrap();
        let config = launch_config(tasks.path().to_path_buf());
        assert!(validate_config(&config, ExecutionMode::Launch).is_ok());
    }

    #[test]
    fn test_missing_tasks_file() {
        let config = launch_config(PathBuf::from("/nonexistent/tasks.txt"));
        let err = validate_config(&config, ExecutionMode::Launch).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let mut config = config;
        config.run.tasks_file = None;
        assert!(validate_config(&config, ExecutionMode::Coordinator).is_err());
    }

    #[test]
    fn test_zero_workers() {
        let tasks = tempfile::NamedTempFile::new().unwrap();
        let mut config = launch_config(tasks.path().to_path_buf());
        config.run.workers = 0;
        assert!(validate_config(&config, ExecutionMode::Launch).is_err());
    }

    #[test]
    fn test_empty_template() {
        let tasks = tempfile::NamedTempFile::new().unwrap();
        let mut config = launch_config(tasks.path().to_path_buf());
        config.command.template = "  ".to_string();
        assert!(validate_config(&config, ExecutionMode::Launch).is_err());

        // Coordinators never run commands
        assert!(validate_config(&config, ExecutionMode::Coordinator).is_ok());
    }

    #[test]
    fn test_worker_requires_connect() {
        let mut config = Config::default();
        config.command.template = "echo {}".to_string();
        assert!(validate_config(&config, ExecutionMode::Worker).is_err());

        config.network.connect = Some("127.0.0.1:7000".to_string());
        assert!(validate_config(&config, ExecutionMode::Worker).is_ok());
    }
}
