//! Process role bootstrap
//!
//! Rank 0 coordinates, every other rank works. Two ways to bring a cluster up:
//!
//! - `run_local`: every rank in this process, workers on blocking threads over
//!   the in-process transport
//! - `spawn_worker_processes`: copies of the current executable started in
//!   worker mode, each connecting back to a TCP coordinator

use crate::coordinator::{Collected, Coordinator, DistributeOptions};
use crate::error::DistributeError;
use crate::transport::{LocalCluster, Rank, COORDINATOR};
use crate::worker::receive_and_run;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Role of a process, fixed by its rank for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl Role {
    pub fn for_rank(rank: Rank) -> Self {
        if rank == COORDINATOR {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }
}

/// Run a whole cluster inside this process
///
/// Ranks 1..=workers run `task_fn`, each on its own thread; the
/// `reserved_workers` ranks above them exist but stay silent. Returns once
/// every worker has exited.
pub async fn run_local<T, R, A, F, G>(
    workers: usize,
    tasks: Vec<T>,
    task_fn: F,
    options: &DistributeOptions,
    aggregate: G,
) -> Result<Collected<A>, DistributeError>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    F: FnMut(T) -> R + Clone + Send + 'static,
    G: FnMut(R) -> A,
{
    let size = workers + 1 + options.reserved_workers;

    // Validate before any worker starts so a bad call sends nothing.
    let coordinator = Coordinator::new(tasks, size, options.reserved_workers)?;

    let mut endpoints = LocalCluster::new(size);
    let mut coordinator_endpoint = endpoints.remove(0);

    // Each worker gets a blocking-pool thread so long task functions run in
    // parallel and never stall the coordinator.
    let runtime = Handle::current();
    let handles: Vec<_> = endpoints
        .into_iter()
        .take(workers)
        .map(|mut endpoint| {
            let task_fn = task_fn.clone();
            let runtime = runtime.clone();
            tokio::task::spawn_blocking(move || runtime.block_on(receive_and_run(&mut endpoint, task_fn)))
        })
        .collect();

    debug!(workers, reserved = options.reserved_workers, "local cluster started");
    let collected = coordinator.run(&mut coordinator_endpoint, aggregate).await?;

    for handle in handles {
        handle.await??;
    }

    Ok(collected)
}

/// Worker processes started by this process
pub struct WorkerProcesses {
    children: Vec<Child>,
}

/// Start `count` copies of `exe`, each with `args`
///
/// Children inherit stderr so their logs interleave with ours.
pub fn spawn_worker_processes(exe: &Path, count: usize, args: &[String]) -> crate::Result<WorkerProcesses> {
    let mut children = Vec::with_capacity(count);

    for i in 0..count {
        let spawned = Command::new(exe)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn();

        match spawned {
            Ok(child) => {
                debug!(pid = child.id(), "spawned worker process");
                children.push(child);
            }
            Err(e) => {
                for child in &mut children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(e).with_context(|| format!("Failed to spawn worker process {}", i));
            }
        }
    }

    info!(count, exe = %exe.display(), "worker processes launched");
    Ok(WorkerProcesses { children })
}

impl WorkerProcesses {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Wait up to `grace` for every child to exit, then kill the rest
    ///
    /// Returns the number of children that had to be killed.
    pub fn reap(mut self, grace: Duration) -> crate::Result<usize> {
        let deadline = Instant::now() + grace;
        let mut killed = 0;

        for child in &mut self.children {
            loop {
                if let Some(status) = child.try_wait()? {
                    debug!(pid = child.id(), %status, "worker process exited");
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(pid = child.id(), "worker process still running, killing");
                    child.kill()?;
                    child.wait()?;
                    killed += 1;
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        Ok(killed)
    }
}
