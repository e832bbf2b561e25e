//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Config {
    if let Some(workers) = cli.workers {
        config.run.workers = workers;
    }
    if let Some(ref tasks_file) = cli.tasks_file {
        config.run.tasks_file = Some(tasks_file.clone());
    }

    if let Some(ref template) = cli.command {
        config.command.template = template.clone();
    }
    if let Some(ref shell) = cli.shell {
        config.command.shell = shell.clone();
    }

    if let Some(ref bind) = cli.bind {
        config.network.bind = bind.clone();
    }
    if let Some(ref connect) = cli.connect {
        config.network.connect = Some(connect.clone());
    }
    if let Some(secs) = cli.accept_timeout {
        config.network.accept_timeout_secs = secs;
    }

    if let Some(ref path) = cli.output {
        config.output.path = Some(path.clone());
    }
    if let Some(format) = cli.format {
        config.output.format = format;
    }
    if let Some(order) = cli.order {
        config.output.order = order;
    }

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    config
}

/// Build the effective configuration: TOML file if given, then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };

    Ok(merge_cli_with_config(cli, base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = parse_toml_string(
            r#"
            [run]
            workers = 12
            tasks_file = "genomes.txt"

            [network]
            bind = "0.0.0.0:7000"
            accept_timeout_secs = 120

            [command]
            template = "makeblastdb -in {}"
            shell = "bash"

            [output]
            path = "results.jsonl"
            format = "jsonl"
            order = "arrival"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.run.workers, 12);
        assert_eq!(config.run.tasks_file, Some(PathBuf::from("genomes.txt")));
        assert_eq!(config.network.bind, "0.0.0.0:7000");
        assert_eq!(config.network.accept_timeout_secs, 120);
        assert_eq!(config.network.reap_timeout_secs, 5);
        assert_eq!(config.command.template, "makeblastdb -in {}");
        assert_eq!(config.command.shell, "bash");
        assert_eq!(config.output.format, OutputFormat::JsonLines);
        assert_eq!(config.output.order, ResultOrder::Arrival);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.network.bind, "127.0.0.1:0");
        assert_eq!(config.command.shell, "sh");
        assert_eq!(config.output.order, ResultOrder::Task);
        assert!(config.run.workers >= 1);
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(parse_toml_string("[output]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nworkers = 3\n[command]\ntemplate = \"echo {{}}\"").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from(["taskfarm", "-c", &path, "-w", "9", "tasks.txt"]).unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.run.workers, 9);
        assert_eq!(config.command.template, "echo {}");
        assert_eq!(config.run.tasks_file, Some(PathBuf::from("tasks.txt")));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::try_parse_from(["taskfarm", "-c", "/nonexistent/taskfarm.toml"]).unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
