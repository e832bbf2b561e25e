//! In-process transport
//!
//! Every rank owns an unbounded tokio channel as its inbox and a sender for
//! every inbox in the cluster. Channel FIFO order gives per-sender ordering.

use super::{Rank, Transport};
use crate::error::TransportError;
use crate::protocol::{Envelope, Tag};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Factory for a set of connected in-process endpoints
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` endpoints; endpoint `i` has rank `i`
    pub fn new(size: usize) -> Vec<LocalTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<Envelope>()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalTransport {
                rank,
                peers: senders.clone(),
                inbox,
                pending: VecDeque::new(),
            })
            .collect()
    }
}

/// One rank's endpoint in a `LocalCluster`
pub struct LocalTransport {
    rank: Rank,
    peers: Vec<UnboundedSender<Envelope>>,
    inbox: UnboundedReceiver<Envelope>,
    pending: VecDeque<Envelope>,
}

impl LocalTransport {
    fn check_rank(&self, rank: Rank) -> Result<(), TransportError> {
        if rank >= self.peers.len() {
            return Err(TransportError::UnknownRank {
                rank,
                size: self.peers.len(),
            });
        }
        Ok(())
    }

    async fn next_from_inbox(&mut self) -> Result<Envelope, TransportError> {
        // Our own sender lives in `peers`, so the channel only closes on drop.
        self.inbox
            .recv()
            .await
            .ok_or(TransportError::Disconnected(self.rank))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    async fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check_rank(dest)?;
        self.peers[dest]
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| TransportError::Disconnected(dest))
    }

    async fn recv_any(&mut self) -> Result<Envelope, TransportError> {
        if let Some(envelope) = self.pending.pop_front() {
            return Ok(envelope);
        }
        self.next_from_inbox().await
    }

    async fn recv_from(&mut self, source: Rank) -> Result<Envelope, TransportError> {
        self.check_rank(source)?;

        if let Some(pos) = self.pending.iter().position(|e| e.source == source) {
            if let Some(envelope) = self.pending.remove(pos) {
                return Ok(envelope);
            }
        }

        loop {
            let envelope = self.next_from_inbox().await?;
            if envelope.source == source {
                return Ok(envelope);
            }
            self.pending.push_back(envelope);
        }
    }
}
