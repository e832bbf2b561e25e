//! Coordinator assignment loop
//!
//! The coordinator (rank 0) owns the task list, a cursor into it and the
//! result collection. It reacts to one message at a time:
//!
//! - EXIT: a worker has terminated, count it
//! - DONE: aggregate and store the result, then hand the sender the next
//!   task or tell it to exit. A result for a task that was never handed out,
//!   or one that already has a result, is an error
//! - READY with tasks left: hand the sender the next task
//! - anything else: tell the sender to exit
//!
//! The loop ends once every worker has acknowledged EXIT. If a worker dies
//! without doing so, the coordinator waits forever unless the transport
//! reports the loss.

use crate::error::DistributeError;
use crate::protocol::{decode_payload, encode_payload, Assignment, Completion, Envelope, Tag};
use crate::transport::{Rank, Transport, COORDINATOR};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Tasks remain to be handed out
    Dispatching,
    /// Every task is handed out, waiting for workers to finish and exit
    Draining,
    /// Every worker has acknowledged EXIT
    Finished,
}

/// Caller options for `distribute_with`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributeOptions {
    /// Ranks excluded from the worker pool (they never run a worker loop)
    pub reserved_workers: usize,
}

/// Results in arrival order, with the index of the task each came from
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<A> {
    pub results: Vec<A>,
    pub task_indices: Vec<usize>,
}

impl<A> Collected<A> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            task_indices: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Reorder results to match the input task list
    pub fn into_task_order(self) -> Vec<A> {
        let mut paired: Vec<(usize, A)> = self.task_indices.into_iter().zip(self.results).collect();
        paired.sort_by_key(|(index, _)| *index);
        paired.into_iter().map(|(_, result)| result).collect()
    }
}

/// Reply owed to the sender of the message just handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Send START with the task at this index
    Start(usize),
    Exit,
    Nothing,
}

/// Assignment loop state for one `distribute` call
pub struct Coordinator<T, A> {
    tasks: Vec<T>,
    cursor: usize,
    num_workers: usize,
    closed_workers: usize,
    completed: Vec<bool>,
    collected: Collected<A>,
}

impl<T, A> Coordinator<T, A> {
    /// Set up a run over `tasks` for a cluster of `size` ranks
    ///
    /// `reserved` ranks are left out of the worker pool.
    pub fn new(tasks: Vec<T>, size: usize, reserved: usize) -> Result<Self, DistributeError> {
        if tasks.is_empty() {
            return Err(DistributeError::EmptyTaskList);
        }

        let num_workers = size.saturating_sub(1 + reserved);
        if num_workers == 0 {
            return Err(DistributeError::NoWorkers { size, reserved });
        }

        let collected = Collected::with_capacity(tasks.len());
        Ok(Self {
            completed: vec![false; tasks.len()],
            tasks,
            cursor: 0,
            num_workers,
            closed_workers: 0,
            collected,
        })
    }

    pub fn phase(&self) -> Phase {
        if self.closed_workers == self.num_workers {
            Phase::Finished
        } else if self.cursor < self.tasks.len() {
            Phase::Dispatching
        } else {
            Phase::Draining
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Tasks not yet handed out
    pub fn remaining(&self) -> usize {
        self.tasks.len() - self.cursor
    }

    /// Workers that have not acknowledged EXIT
    pub fn busy_workers(&self) -> usize {
        self.num_workers.saturating_sub(self.closed_workers)
    }

    fn next_assignment(&mut self) -> Reply {
        if self.cursor < self.tasks.len() {
            let index = self.cursor;
            self.cursor += 1;
            Reply::Start(index)
        } else {
            Reply::Exit
        }
    }

    /// Only tasks already handed out can complete, and each only once
    fn check_completion(&self, worker: Rank, index: u64) -> Result<usize, DistributeError> {
        let position = usize::try_from(index)
            .ok()
            .filter(|&i| i < self.cursor)
            .ok_or(DistributeError::UnassignedResult { worker, index })?;
        if self.completed[position] {
            return Err(DistributeError::DuplicateResult { worker, index });
        }
        Ok(position)
    }

    /// Advance the state machine by one received message
    pub fn on_message<R, F>(&mut self, envelope: &Envelope, aggregate: &mut F) -> Result<Reply, DistributeError>
    where
        R: DeserializeOwned,
        F: FnMut(R) -> A,
    {
        let worker = envelope.source;
        let reply = match envelope.tag {
            Tag::Exit if self.closed_workers == self.num_workers => {
                warn!(worker, "EXIT after every worker has exited, ignoring");
                Reply::Nothing
            }
            Tag::Exit => {
                self.closed_workers += 1;
                info!(worker, "worker exited");
                Reply::Nothing
            }
            Tag::Done => {
                let completion: Completion<R> = decode_payload(&envelope.payload)?;
                let index = self.check_completion(worker, completion.index)?;
                debug!(worker, task = index, "received result");
                self.completed[index] = true;
                self.collected.results.push(aggregate(completion.result));
                self.collected.task_indices.push(index);
                self.next_assignment()
            }
            Tag::Ready if self.cursor < self.tasks.len() => {
                debug!(worker, "worker ready");
                self.next_assignment()
            }
            Tag::Ready => Reply::Exit,
            Tag::Start => {
                warn!(worker, "unexpected START from worker");
                Reply::Exit
            }
        };
        Ok(reply)
    }

    pub fn into_collected(self) -> Collected<A> {
        self.collected
    }
}

impl<T: Serialize, A> Coordinator<T, A> {
    /// Serve workers until every one of them has exited
    pub async fn run<X, R, F>(mut self, transport: &mut X, mut aggregate: F) -> Result<Collected<A>, DistributeError>
    where
        X: Transport,
        R: DeserializeOwned,
        F: FnMut(R) -> A,
    {
        info!(
            tasks = self.tasks.len(),
            workers = self.num_workers,
            "coordinator starting"
        );

        while self.phase() != Phase::Finished {
            let envelope = transport.recv_any().await?;
            let worker = envelope.source;

            match self.on_message::<R, F>(&envelope, &mut aggregate)? {
                Reply::Start(index) => {
                    let payload = encode_payload(&Assignment {
                        index: index as u64,
                        task: &self.tasks[index],
                    })?;
                    transport.send(worker, Tag::Start, payload).await?;
                    debug!(worker, task = index, "assigned task");
                }
                Reply::Exit => {
                    transport.send(worker, Tag::Exit, Vec::new()).await?;
                    debug!(worker, "no more tasks, sent exit");
                }
                Reply::Nothing => {}
            }

            debug!(
                remaining = self.remaining(),
                busy = self.busy_workers(),
                "coordinator progress"
            );
        }

        info!(results = self.collected.len(), "coordinator finished");
        Ok(self.into_collected())
    }
}

/// Distribute `tasks` over every worker in the cluster and collect the raw
/// results in arrival order
pub async fn distribute<X, T, R>(transport: &mut X, tasks: Vec<T>) -> Result<Vec<R>, DistributeError>
where
    X: Transport,
    T: Serialize,
    R: DeserializeOwned,
{
    let collected = distribute_with(transport, tasks, &DistributeOptions::default(), |r: R| r).await?;
    Ok(collected.results)
}

/// Distribute `tasks`, passing every result through `aggregate` before it is
/// stored
pub async fn distribute_with<X, T, R, A, F>(
    transport: &mut X,
    tasks: Vec<T>,
    options: &DistributeOptions,
    aggregate: F,
) -> Result<Collected<A>, DistributeError>
where
    X: Transport,
    T: Serialize,
    R: DeserializeOwned,
    F: FnMut(R) -> A,
{
    let rank: Rank = transport.rank();
    if rank != COORDINATOR {
        return Err(DistributeError::NotCoordinator(rank));
    }

    let coordinator = Coordinator::new(tasks, transport.size(), options.reserved_workers)?;
    coordinator.run(transport, aggregate).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalCluster;
    use std::time::Duration;

    fn envelope(source: Rank, tag: Tag, payload: Vec<u8>) -> Envelope {
        Envelope { source, tag, payload }
    }

    fn done(source: Rank, index: u64, result: u32) -> Envelope {
        envelope(source, Tag::Done, encode_payload(&Completion { index, result }).unwrap())
    }

    fn identity(r: u32) -> u32 {
        r
    }

    #[test]
    fn test_empty_task_list() {
        let err = Coordinator::<u32, u32>::new(vec![], 4, 0).err().unwrap();
        assert!(matches!(err, DistributeError::EmptyTaskList));
    }

    #[test]
    fn test_no_workers() {
        let err = Coordinator::<u32, u32>::new(vec![1], 1, 0).err().unwrap();
        assert!(matches!(err, DistributeError::NoWorkers { size: 1, reserved: 0 }));

        let err = Coordinator::<u32, u32>::new(vec![1], 3, 2).err().unwrap();
        assert!(matches!(err, DistributeError::NoWorkers { size: 3, reserved: 2 }));
    }

    #[test]
    fn test_reserved_workers_shrink_pool() {
        let coordinator = Coordinator::<u32, u32>::new(vec![1], 5, 1).unwrap();
        assert_eq!(coordinator.num_workers(), 3);
    }

    #[test]
    fn test_state_machine_walkthrough() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![10, 20], 3, 0).unwrap();
        let mut agg = identity;
        assert_eq!(coordinator.phase(), Phase::Dispatching);

        let reply = coordinator.on_message::<u32, _>(&envelope(1, Tag::Ready, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Start(0));
        let reply = coordinator.on_message::<u32, _>(&envelope(2, Tag::Ready, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Start(1));
        assert_eq!(coordinator.phase(), Phase::Draining);
        assert_eq!(coordinator.remaining(), 0);

        let reply = coordinator.on_message::<u32, _>(&done(2, 1, 200), &mut agg).unwrap();
        assert_eq!(reply, Reply::Exit);
        let reply = coordinator.on_message::<u32, _>(&done(1, 0, 100), &mut agg).unwrap();
        assert_eq!(reply, Reply::Exit);

        let reply = coordinator.on_message::<u32, _>(&envelope(2, Tag::Exit, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Nothing);
        assert_eq!(coordinator.phase(), Phase::Draining);
        assert_eq!(coordinator.busy_workers(), 1);

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Exit, vec![]), &mut agg).unwrap();
        assert_eq!(coordinator.phase(), Phase::Finished);

        let collected = coordinator.into_collected();
        assert_eq!(collected.results, vec![200, 100]);
        assert_eq!(collected.task_indices, vec![1, 0]);
        assert_eq!(collected.into_task_order(), vec![100, 200]);
    }

    #[test]
    fn test_ready_without_tasks_gets_exit() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1], 3, 0).unwrap();
        let mut agg = identity;

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Ready, vec![]), &mut agg).unwrap();
        let reply = coordinator.on_message::<u32, _>(&envelope(2, Tag::Ready, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Exit);
        assert_eq!(coordinator.remaining(), 0);
    }

    #[test]
    fn test_start_from_worker_gets_exit() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1, 2], 2, 0).unwrap();
        let mut agg = identity;

        let reply = coordinator.on_message::<u32, _>(&envelope(1, Tag::Start, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Exit);
        assert_eq!(coordinator.remaining(), 2);
    }

    #[test]
    fn test_aggregate_applied_to_each_result() {
        let mut coordinator = Coordinator::<u32, String>::new(vec![1, 2], 2, 0).unwrap();
        let mut agg = |r: u32| format!("result-{}", r);

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Ready, vec![]), &mut agg).unwrap();
        coordinator.on_message::<u32, _>(&done(1, 0, 7), &mut agg).unwrap();

        assert_eq!(coordinator.into_collected().results, vec!["result-7".to_string()]);
    }

    #[test]
    fn test_extra_exit_after_finish() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1], 2, 0).unwrap();
        let mut agg = identity;

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Exit, vec![]), &mut agg).unwrap();
        assert_eq!(coordinator.phase(), Phase::Finished);

        let reply = coordinator.on_message::<u32, _>(&envelope(1, Tag::Exit, vec![]), &mut agg).unwrap();
        assert_eq!(reply, Reply::Nothing);
        assert_eq!(coordinator.busy_workers(), 0);
        assert_eq!(coordinator.phase(), Phase::Finished);
    }

    #[test]
    fn test_result_for_unassigned_task() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1, 2], 3, 0).unwrap();
        let mut agg = identity;

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Ready, vec![]), &mut agg).unwrap();

        let err = coordinator.on_message::<u32, _>(&done(1, 1, 0), &mut agg).unwrap_err();
        assert!(matches!(err, DistributeError::UnassignedResult { worker: 1, index: 1 }));

        let err = coordinator.on_message::<u32, _>(&done(1, 99, 0), &mut agg).unwrap_err();
        assert!(matches!(err, DistributeError::UnassignedResult { worker: 1, index: 99 }));
        assert!(coordinator.into_collected().is_empty());
    }

    #[test]
    fn test_duplicate_result() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1, 2], 3, 0).unwrap();
        let mut agg = identity;

        coordinator.on_message::<u32, _>(&envelope(1, Tag::Ready, vec![]), &mut agg).unwrap();
        coordinator.on_message::<u32, _>(&done(1, 0, 10), &mut agg).unwrap();

        let err = coordinator.on_message::<u32, _>(&done(2, 0, 10), &mut agg).unwrap_err();
        assert!(matches!(err, DistributeError::DuplicateResult { worker: 2, index: 0 }));
        assert_eq!(coordinator.into_collected().results, vec![10]);
    }

    #[test]
    fn test_malformed_result_payload() {
        let mut coordinator = Coordinator::<u32, u32>::new(vec![1], 2, 0).unwrap();
        let mut agg = identity;

        let err = coordinator
            .on_message::<u32, _>(&envelope(1, Tag::Done, vec![0xc1]), &mut agg)
            .unwrap_err();
        assert!(matches!(err, DistributeError::Decode(_)));
    }

    #[tokio::test]
    async fn test_empty_task_list_sends_nothing() {
        let mut endpoints = LocalCluster::new(2);
        let mut worker = endpoints.pop().unwrap();
        let mut coordinator = endpoints.pop().unwrap();

        let err = distribute::<_, u32, u32>(&mut coordinator, vec![]).await.unwrap_err();
        assert!(matches!(err, DistributeError::EmptyTaskList));

        let received = tokio::time::timeout(Duration::from_millis(20), worker.recv_any()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_distribute_rejects_worker_rank() {
        let mut endpoints = LocalCluster::new(2);
        let err = distribute::<_, u32, u32>(&mut endpoints[1], vec![1]).await.unwrap_err();
        assert!(matches!(err, DistributeError::NotCoordinator(1)));
    }

    #[tokio::test]
    async fn test_run_against_scripted_worker() {
        let mut endpoints = LocalCluster::new(2);
        let mut worker = endpoints.pop().unwrap();
        let mut coordinator = endpoints.pop().unwrap();

        let script = tokio::spawn(async move {
            worker.send(COORDINATOR, Tag::Ready, vec![]).await.unwrap();
            loop {
                let envelope = worker.recv_from(COORDINATOR).await.unwrap();
                match envelope.tag {
                    Tag::Start => {
                        let assignment: Assignment<u32> = decode_payload(&envelope.payload).unwrap();
                        let payload = encode_payload(&Completion {
                            index: assignment.index,
                            result: assignment.task + 1,
                        })
                        .unwrap();
                        worker.send(COORDINATOR, Tag::Done, payload).await.unwrap();
                    }
                    Tag::Exit => break,
                    other => panic!("Unexpected tag: {}", other),
                }
            }
            worker.send(COORDINATOR, Tag::Exit, vec![]).await.unwrap();
        });

        let results: Vec<u32> = distribute(&mut coordinator, vec![1u32, 2, 3]).await.unwrap();
        assert_eq!(results, vec![2, 3, 4]);
        script.await.unwrap();
    }
}
