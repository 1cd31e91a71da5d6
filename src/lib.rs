//! # Serinet
//!
//! Software-defined networks of serial endpoints. A network is a star of
//! byte-forwarding connection points:
//! - Virtual endpoints backed by pseudo-terminal pairs, generated on demand
//! - External endpoints bridging real serial devices into the network
//! - Broadcast forwarding: bytes read from one endpoint reach every other
//! - Optional loopback and raw payload logging
//!
//! Software that expects physical serial hardware can be exercised
//! without it, and several logical consumers can share one physical line.
//! Topology mutations (create, add, remove) are executed by a background
//! worker while forwarding is live.
//!
//! ## Example
//!
//! ```rust,no_run
//! use serinet::{NetworkConfig, SerialNetwork};
//!
//! fn main() -> serinet::Result<()> {
//!     let mut network = SerialNetwork::new(NetworkConfig::new(3));
//!     network.start()?;
//!
//!     for port in network.ports() {
//!         println!("endpoint: {port}");
//!     }
//!
//!     // grow the network while it is running
//!     let created = network.create(2)?;
//!     println!("created: {created:?}");
//!
//!     network.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod config;
pub mod datalog;
mod endpoint;
pub mod error;
pub mod network;
mod poller;
mod worker;

// Re-exports for convenience
pub use crate::channel::{Command, ErrorCause, StatusReply};
pub use crate::config::{SerialFlowControl, SerialParity, SerialPortConfig};
pub use crate::datalog::DataLogConfig;
pub use crate::error::{NetworkError, Result};
pub use crate::network::{NetworkConfig, SerialNetwork, SerialPair};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
