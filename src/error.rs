//! Error types for the distribution protocol and its transports

use crate::transport::Rank;
use thiserror::Error;

/// Failures at the messaging layer
///
/// Every variant is fatal to the process that observes it; the protocol
/// never retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The peer went away before it acknowledged shutdown
    #[error("rank {0} disconnected")]
    Disconnected(Rank),

    /// Every peer connection has closed
    #[error("all peers have closed their connections")]
    Closed,

    #[error("rank {rank} is outside the cluster (size {size})")]
    UnknownRank { rank: Rank, size: usize },

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("truncated frame (need {needed} bytes, got {got})")]
    Truncated { needed: usize, got: usize },

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Errors returned by `distribute` and `receive_and_run`
#[derive(Debug, Error)]
pub enum DistributeError {
    /// Raised before any message is sent
    #[error("task list is empty")]
    EmptyTaskList,

    #[error("no workers available: cluster size {size}, {reserved} reserved")]
    NoWorkers { size: usize, reserved: usize },

    #[error("distribute must run on the coordinator (rank 0), not rank {0}")]
    NotCoordinator(Rank),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A worker task spawned by `run_local` panicked or was cancelled
    #[error("local worker failed: {0}")]
    WorkerJoin(#[from] tokio::task::JoinError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// DONE named a task that was never handed out
    #[error("rank {worker} reported a result for unassigned task {index}")]
    UnassignedResult { worker: Rank, index: u64 },

    #[error("rank {worker} reported a second result for task {index}")]
    DuplicateResult { worker: Rank, index: u64 },
}
