//! taskfarm CLI entry point

use anyhow::{Context, Result};
use std::time::Duration;
use taskfarm::command::{parse_task_lines, CommandOutcome, CommandRunner};
use taskfarm::config::cli::{Cli, ExecutionMode};
use taskfarm::config::toml::load_config;
use taskfarm::config::validator::validate_config;
use taskfarm::config::{Config, ResultOrder};
use taskfarm::launcher::{spawn_worker_processes, Role};
use taskfarm::output::write_results_to;
use taskfarm::transport::{TcpCoordinatorTransport, TcpWorkerTransport, Transport};
use taskfarm::{distribute_with, receive_and_run, DistributeError, DistributeOptions};
use tokio::net::TcpListener;
use tracing::{info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    let config = load_config(&cli)?;
    taskfarm::logging::init(&config.logging.level)?;

    validate_config(&config, cli.mode).context("Configuration validation failed")?;

    if cli.dry_run {
        print_configuration(&config, cli.mode);
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    match cli.mode {
        ExecutionMode::Launch => runtime.block_on(run_launch(&config)),
        ExecutionMode::Coordinator => runtime.block_on(run_coordinator(&config)),
        ExecutionMode::Worker => runtime.block_on(run_worker(&config)),
    }
}

/// Spawn local worker processes and coordinate them
async fn run_launch(config: &Config) -> Result<()> {
    let tasks = read_tasks(config)?;

    let listener = TcpListener::bind(&config.network.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.network.bind))?;
    let addr = listener.local_addr().context("Failed to read listening address")?;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let args = vec![
        "--mode".to_string(),
        "worker".to_string(),
        "--connect".to_string(),
        addr.to_string(),
        "--command".to_string(),
        config.command.template.clone(),
        "--shell".to_string(),
        config.command.shell.clone(),
        "--log-level".to_string(),
        config.logging.level.clone(),
    ];
    let processes = spawn_worker_processes(&exe, config.run.workers, &args)?;

    let result = coordinate(&listener, config, tasks).await;

    let grace = Duration::from_secs(config.network.reap_timeout_secs);
    match tokio::task::spawn_blocking(move || processes.reap(grace)).await {
        Ok(Ok(0)) => {}
        Ok(Ok(killed)) => warn!(killed, "killed worker processes that did not exit"),
        Ok(Err(e)) => warn!(error = %e, "failed to clean up worker processes"),
        Err(e) => warn!(error = %e, "worker cleanup task failed"),
    }

    result
}

/// Wait for remote workers and coordinate them
async fn run_coordinator(config: &Config) -> Result<()> {
    let tasks = read_tasks(config)?;

    let listener = TcpListener::bind(&config.network.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.network.bind))?;
    let addr = listener.local_addr().context("Failed to read listening address")?;
    info!(%addr, workers = config.run.workers, "waiting for workers");

    coordinate(&listener, config, tasks).await
}

/// Connect to a coordinator and run tasks until told to stop
async fn run_worker(config: &Config) -> Result<()> {
    let addr = config
        .network
        .connect
        .as_deref()
        .context("Worker mode requires a coordinator address")?;

    let mut transport = TcpWorkerTransport::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to coordinator at {}", addr))?;

    if Role::for_rank(transport.rank()) != Role::Worker {
        anyhow::bail!("Coordinator assigned rank {} to a worker", transport.rank());
    }

    let runner = CommandRunner::new(config.command.template.clone(), config.command.shell.clone());
    receive_and_run(&mut transport, |task: String| runner.run(task))
        .await
        .context("Worker failed")?;

    Ok(())
}

async fn coordinate(listener: &TcpListener, config: &Config, tasks: Vec<String>) -> Result<()> {
    let timeout = Duration::from_secs(config.network.accept_timeout_secs);
    let mut transport = TcpCoordinatorTransport::accept(listener, config.run.workers, timeout)
        .await
        .context("Failed to gather workers")?;

    let mut failures = 0usize;
    let collected = distribute_with(
        &mut transport,
        tasks,
        &DistributeOptions::default(),
        |outcome: CommandOutcome| {
            if !outcome.success() {
                failures += 1;
                warn!(
                    task = %outcome.task,
                    host = %outcome.host,
                    exit_code = ?outcome.exit_code,
                    error = ?outcome.error,
                    "task failed"
                );
            }
            outcome
        },
    )
    .await
    .context("Task distribution failed")?;

    info!(tasks = collected.len(), failures, "all tasks complete");

    let results = match config.output.order {
        ResultOrder::Task => collected.into_task_order(),
        ResultOrder::Arrival => collected.results,
    };
    write_results_to(config.output.path.as_deref(), &results, config.output.format)
}

fn read_tasks(config: &Config) -> Result<Vec<String>> {
    let path = config
        .run
        .tasks_file
        .as_deref()
        .context("A tasks file is required")?;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file: {}", path.display()))?;

    let tasks = parse_task_lines(&contents);
    if tasks.is_empty() {
        return Err(DistributeError::EmptyTaskList)
            .with_context(|| format!("No tasks in {}", path.display()));
    }

    info!(tasks = tasks.len(), file = %path.display(), "loaded tasks");
    Ok(tasks)
}

fn print_configuration(config: &Config, mode: ExecutionMode) {
    println!("taskfarm v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Configuration:");
    println!("  Mode: {:?}", mode);
    println!("  Workers: {}", config.run.workers);
    if let Some(ref path) = config.run.tasks_file {
        println!("  Tasks file: {}", path.display());
    }
    println!("  Command: {}", config.command.template);
    println!("  Shell: {}", config.command.shell);
    println!("  Bind: {}", config.network.bind);
    if let Some(ref connect) = config.network.connect {
        println!("  Connect: {}", connect);
    }
    match config.output.path {
        Some(ref path) => println!("  Output: {} ({})", path.display(), config.output.format),
        None => println!("  Output: stdout ({})", config.output.format),
    }
    println!("  Result order: {}", config.output.order);
}
