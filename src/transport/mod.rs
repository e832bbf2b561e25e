//! Point-to-point transports
//!
//! The distribution protocol only needs what an MPI communicator offers:
//! tagged send, blocking receive from any source and receive from a specific
//! source. Messages from one sender to one receiver arrive in the order sent.
//!
//! # Implementations
//!
//! - `local`: in-process channels, one endpoint per rank
//! - `tcp`: coordinator listens, workers connect (one process per rank)

pub mod local;
pub mod tcp;

use crate::error::TransportError;
use crate::protocol::{Envelope, Tag};
use std::future::Future;

pub use local::{LocalCluster, LocalTransport};
pub use tcp::{TcpCoordinatorTransport, TcpWorkerTransport};

/// Process ordinal within a cluster
pub type Rank = usize;

/// Rank of the coordinating process
pub const COORDINATOR: Rank = 0;

/// Tagged point-to-point messaging
///
/// Receives have no timeout: a peer that never sends blocks the receiver
/// forever.
pub trait Transport: Send {
    /// Rank of this endpoint
    fn rank(&self) -> Rank;

    /// Number of ranks in the cluster, coordinator included
    fn size(&self) -> usize;

    fn send(
        &mut self,
        dest: Rank,
        tag: Tag,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Block until a message from any rank arrives
    fn recv_any(&mut self) -> impl Future<Output = Result<Envelope, TransportError>> + Send;

    /// Block until a message from `source` arrives
    ///
    /// Messages from other ranks that arrive first stay queued for later
    /// receives.
    fn recv_from(
        &mut self,
        source: Rank,
    ) -> impl Future<Output = Result<Envelope, TransportError>> + Send;
}
