//! Worker receive-execute-report loop
//!
//! A worker announces itself once with READY, then only reacts: START runs
//! the task function and answers DONE, EXIT ends the loop. The final EXIT
//! sent back acknowledges shutdown.
//!
//! The task function is not guarded. If it panics the worker dies without
//! reporting, and the coordinator never hears from it again.

use crate::error::DistributeError;
use crate::protocol::{decode_payload, encode_payload, Assignment, Completion, Tag};
use crate::transport::{Transport, COORDINATOR};
use crate::util::host_name;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Working,
    Terminated,
}

/// Serve tasks from the coordinator until it sends EXIT
pub async fn receive_and_run<X, T, R, F>(transport: &mut X, mut task_fn: F) -> Result<(), DistributeError>
where
    X: Transport,
    T: DeserializeOwned,
    R: Serialize,
    F: FnMut(T) -> R,
{
    let rank = transport.rank();
    info!(worker = rank, host = %host_name(), "worker started");

    transport.send(COORDINATOR, Tag::Ready, Vec::new()).await?;
    let mut state = WorkerState::Idle;
    let mut completed = 0usize;

    while state != WorkerState::Terminated {
        let envelope = transport.recv_from(COORDINATOR).await?;

        match envelope.tag {
            Tag::Start => {
                let assignment: Assignment<T> = decode_payload(&envelope.payload)?;
                state = WorkerState::Working;
                debug!(worker = rank, task = assignment.index, ?state, "received task");

                let result = task_fn(assignment.task);
                let payload = encode_payload(&Completion {
                    index: assignment.index,
                    result,
                })?;
                transport.send(COORDINATOR, Tag::Done, payload).await?;

                completed += 1;
                state = WorkerState::Idle;
            }
            Tag::Exit => {
                state = WorkerState::Terminated;
            }
            other => {
                warn!(worker = rank, tag = %other, "ignoring unexpected message from coordinator");
            }
        }
    }

    info!(worker = rank, tasks = completed, "worker exiting");
    transport.send(COORDINATOR, Tag::Exit, Vec::new()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalCluster;

    #[tokio::test]
    async fn test_worker_announces_runs_and_acknowledges() {
        let mut endpoints = LocalCluster::new(2);
        let mut worker = endpoints.pop().unwrap();
        let mut coordinator = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move {
            receive_and_run(&mut worker, |x: u32| x * 100).await.unwrap();
        });

        let ready = coordinator.recv_any().await.unwrap();
        assert_eq!((ready.source, ready.tag), (1, Tag::Ready));

        let payload = encode_payload(&Assignment { index: 4, task: 3u32 }).unwrap();
        coordinator.send(1, Tag::Start, payload).await.unwrap();

        let done = coordinator.recv_any().await.unwrap();
        assert_eq!(done.tag, Tag::Done);
        let completion: Completion<u32> = decode_payload(&done.payload).unwrap();
        assert_eq!(completion, Completion { index: 4, result: 300 });

        coordinator.send(1, Tag::Exit, vec![]).await.unwrap();
        let exit = coordinator.recv_any().await.unwrap();
        assert_eq!(exit.tag, Tag::Exit);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_ignores_stray_tags() {
        let mut endpoints = LocalCluster::new(2);
        let mut worker = endpoints.pop().unwrap();
        let mut coordinator = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move {
            receive_and_run(&mut worker, |x: u32| x).await.unwrap();
        });

        coordinator.recv_any().await.unwrap();
        coordinator.send(1, Tag::Ready, vec![]).await.unwrap();
        coordinator.send(1, Tag::Done, vec![]).await.unwrap();
        coordinator.send(1, Tag::Exit, vec![]).await.unwrap();

        let exit = coordinator.recv_any().await.unwrap();
        assert_eq!(exit.tag, Tag::Exit);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_sends_exactly_one_ready() {
        let mut endpoints = LocalCluster::new(2);
        let mut worker = endpoints.pop().unwrap();
        let mut coordinator = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move {
            receive_and_run(&mut worker, |x: u32| x + 1).await.unwrap();
        });

        let mut tags = Vec::new();
        tags.push(coordinator.recv_any().await.unwrap().tag);
        for index in 0..3u64 {
            let payload = encode_payload(&Assignment { index, task: 0u32 }).unwrap();
            coordinator.send(1, Tag::Start, payload).await.unwrap();
            tags.push(coordinator.recv_any().await.unwrap().tag);
        }
        coordinator.send(1, Tag::Exit, vec![]).await.unwrap();
        tags.push(coordinator.recv_any().await.unwrap().tag);

        assert_eq!(
            tags,
            vec![Tag::Ready, Tag::Done, Tag::Done, Tag::Done, Tag::Exit]
        );
        handle.await.unwrap();
    }
}
