//! taskfarm - dynamic load-balancing task farm
//!
//! A coordinator (rank 0) hands tasks one at a time to a fixed pool of
//! worker processes over point-to-point messages and collects one result per
//! task. Idle workers ask for work, so faster workers simply get more tasks.
//!
//! # Architecture
//!
//! - **Protocol**: four tags (READY, START, DONE, EXIT) with MessagePack payloads
//! - **Coordinator**: task cursor, result collection, worker shutdown
//! - **Worker**: request, execute, report, repeat until EXIT
//! - **Transports**: in-process channels or TCP between processes
//! - **Launcher**: rank-to-role bootstrap, local clusters, worker processes
//!
//! # Example
//!
//! ```no_run
//! use taskfarm::{run_local, DistributeOptions};
//!
//! # async fn example() -> Result<(), taskfarm::DistributeError> {
//! let collected = run_local(
//!     4,
//!     (0..10u32).collect(),
//!     |x: u32| x * 100,
//!     &DistributeOptions::default(),
//!     |r: u32| r,
//! )
//! .await?;
//! assert_eq!(collected.len(), 10);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod transport;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{distribute, distribute_with, Collected, DistributeOptions};
pub use error::{DistributeError, TransportError};
pub use launcher::{run_local, Role};
pub use protocol::Tag;
pub use transport::{Rank, Transport, COORDINATOR};
pub use worker::receive_and_run;

/// Result type used by the binary-facing modules
pub type Result<T> = anyhow::Result<T>;
