//! TCP transport
//!
//! The coordinator listens; every worker process connects once and keeps the
//! connection for the whole run.
//!
//! # Handshake
//!
//! ```text
//! Worker                          Coordinator
//!     |---- HELLO(version, host) ---->|
//!     |<--- WELCOME(rank, size) ------|   or REJECTED(reason)
//! ```
//!
//! Handshake messages are MessagePack with a 4-byte little-endian length
//! prefix. After the handshake both sides switch to tagged protocol frames.
//! The coordinator runs one reader task per connection, all feeding a single
//! inbox, which is what gives it receive-from-any-source.

use super::{Rank, Transport, COORDINATOR};
use crate::error::TransportError;
use crate::protocol::{read_frame, write_frame, Envelope, Tag, MAX_FRAME_LEN, PROTOCOL_VERSION};
use crate::util::host_name;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bootstrap messages exchanged before the task protocol starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Handshake {
    /// Worker → Coordinator
    Hello { protocol_version: u32, host: String },
    /// Coordinator → Worker
    Welcome { rank: Rank, size: usize },
    /// Coordinator → Worker, connection is closed afterwards
    Rejected { reason: String },
}

async fn write_handshake(stream: &mut TcpStream, msg: &Handshake) -> Result<(), TransportError> {
    let bytes = rmp_serde::to_vec(msg)
        .map_err(|e| TransportError::Handshake(format!("failed to encode handshake: {}", e)))?;

    let mut framed = Vec::with_capacity(4 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    framed.extend_from_slice(&bytes);

    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_handshake(stream: &mut TcpStream) -> Result<Handshake, TransportError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    rmp_serde::from_slice(&buf)
        .map_err(|e| TransportError::Handshake(format!("failed to decode handshake: {}", e)))
}

fn disconnect_or(rank: Rank, err: TransportError) -> TransportError {
    match err {
        TransportError::Io(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
            TransportError::Disconnected(rank)
        }
        other => other,
    }
}

/// Forward frames from one worker connection into the coordinator's inbox
///
/// Stops after the worker's EXIT acknowledgement. A connection that ends
/// before that is reported as `Disconnected`.
async fn forward_frames(
    rank: Rank,
    mut read_half: OwnedReadHalf,
    inbox: UnboundedSender<Result<Envelope, TransportError>>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok((tag, payload)) => {
                let envelope = Envelope {
                    source: rank,
                    tag,
                    payload,
                };
                if inbox.send(Ok(envelope)).is_err() {
                    return;
                }
                if tag == Tag::Exit {
                    debug!(worker = rank, "connection reader finished");
                    return;
                }
            }
            Err(e) => {
                let err = disconnect_or(rank, e);
                warn!(worker = rank, error = %err, "lost connection to worker");
                let _ = inbox.send(Err(err));
                return;
            }
        }
    }
}

/// Coordinator endpoint (rank 0)
pub struct TcpCoordinatorTransport {
    size: usize,
    writers: Vec<OwnedWriteHalf>,
    inbox: UnboundedReceiver<Result<Envelope, TransportError>>,
    pending: VecDeque<Envelope>,
    readers: Vec<JoinHandle<()>>,
}

impl TcpCoordinatorTransport {
    /// Accept `workers` connections and assign them ranks 1..=workers
    ///
    /// Fails if the workers do not all arrive within `timeout`, or if any of
    /// them speaks a different protocol version.
    pub async fn accept(
        listener: &TcpListener,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let size = workers + 1;
        let deadline = Instant::now() + timeout;
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let mut writers = Vec::with_capacity(workers);
        let mut readers = Vec::with_capacity(workers);

        for rank in 1..size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (mut stream, addr) = tokio::time::timeout(remaining, listener.accept())
                .await
                .map_err(|_| {
                    TransportError::Handshake(format!(
                        "timed out waiting for workers ({} of {} connected)",
                        rank - 1,
                        workers
                    ))
                })??;

            stream.set_nodelay(true)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let hello = tokio::time::timeout(remaining, read_handshake(&mut stream))
                .await
                .map_err(|_| {
                    TransportError::Handshake(format!("timed out waiting for HELLO from {}", addr))
                })??;

            let host = match hello {
                Handshake::Hello {
                    protocol_version,
                    host,
                } if protocol_version == PROTOCOL_VERSION => host,
                Handshake::Hello {
                    protocol_version, ..
                } => {
                    let reason = format!(
                        "protocol version mismatch: coordinator={}, worker={}",
                        PROTOCOL_VERSION, protocol_version
                    );
                    write_handshake(&mut stream, &Handshake::Rejected { reason: reason.clone() })
                        .await?;
                    return Err(TransportError::Handshake(reason));
                }
                other => {
                    return Err(TransportError::Handshake(format!(
                        "expected HELLO from {}, got {:?}",
                        addr, other
                    )));
                }
            };

            write_handshake(&mut stream, &Handshake::Welcome { rank, size }).await?;
            info!(worker = rank, %addr, %host, "worker connected");

            let (read_half, write_half) = stream.into_split();
            readers.push(tokio::spawn(forward_frames(rank, read_half, inbox_tx.clone())));
            writers.push(write_half);
        }

        Ok(Self {
            size,
            writers,
            inbox,
            pending: VecDeque::new(),
            readers,
        })
    }

    async fn next_from_inbox(&mut self) -> Result<Envelope, TransportError> {
        match self.inbox.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed),
        }
    }
}

impl Drop for TcpCoordinatorTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

impl Transport for TcpCoordinatorTransport {
    fn rank(&self) -> Rank {
        COORDINATOR
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError> {
        if dest == COORDINATOR || dest >= self.size {
            return Err(TransportError::UnknownRank {
                rank: dest,
                size: self.size,
            });
        }
        write_frame(&mut self.writers[dest - 1], tag, &payload)
            .await
            .map_err(|e| disconnect_or(dest, e))
    }

    async fn recv_any(&mut self) -> Result<Envelope, TransportError> {
        if let Some(envelope) = self.pending.pop_front() {
            return Ok(envelope);
        }
        self.next_from_inbox().await
    }

    async fn recv_from(&mut self, source: Rank) -> Result<Envelope, TransportError> {
        if source == COORDINATOR || source >= self.size {
            return Err(TransportError::UnknownRank {
                rank: source,
                size: self.size,
            });
        }

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

/// Worker endpoint, connected to the coordinator only
pub struct TcpWorkerTransport {
    rank: Rank,
    size: usize,
    stream: TcpStream,
}

impl TcpWorkerTransport {
    /// Connect to the coordinator and receive this process's rank
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let hello = Handshake::Hello {
            protocol_version: PROTOCOL_VERSION,
            host: host_name(),
        };
        write_handshake(&mut stream, &hello).await?;

        match read_handshake(&mut stream).await.map_err(|e| disconnect_or(COORDINATOR, e))? {
            Handshake::Welcome { rank, size } => Ok(Self { rank, size, stream }),
            Handshake::Rejected { reason } => Err(TransportError::Handshake(reason)),
            other => Err(TransportError::Handshake(format!(
                "expected WELCOME, got {:?}",
                other
            ))),
        }
    }
}

impl Transport for TcpWorkerTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError> {
        if dest != COORDINATOR {
            return Err(TransportError::UnknownRank {
                rank: dest,
                size: self.size,
            });
        }
        write_frame(&mut self.stream, tag, &payload)
            .await
            .map_err(|e| disconnect_or(COORDINATOR, e))
    }

    async fn recv_any(&mut self) -> Result<Envelope, TransportError> {
        self.recv_from(COORDINATOR).await
    }

    async fn recv_from(&mut self, source: Rank) -> Result<Envelope, TransportError> {
        if source != COORDINATOR {
            return Err(TransportError::UnknownRank {
                rank: source,
                size: self.size,
            });
        }
        let (tag, payload) = read_frame(&mut self.stream)
            .await
            .map_err(|e| disconnect_or(COORDINATOR, e))?;
        Ok(Envelope {
            source: COORDINATOR,
            tag,
            payload,
        })
    }
}
