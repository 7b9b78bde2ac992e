//! WEFT Core Library
//!
//! This crate provides the data plane of the WEFT concurrency runtime:
//! shared-memory channels, the payload value type, and the sizing helper
//! used when provisioning channel slots.
//!
//! # Overview
//!
//! A WEFT channel is a bounded (or rendezvous) FIFO whose entire state lives
//! in a single memory region shared by every execution context. A 28-byte
//! header of atomic words coordinates senders and receivers; fixed-size
//! slots carry length-prefixed payload bytes.
//!
//! # Key Components
//!
//! - **Channel**: bounded/rendezvous FIFO over a shared region
//! - **Value**: JSON-backed payload type with a byte codec
//! - **Sizing**: deterministic sample-to-slot-budget mapping
//! - **Types**: strongly-typed identifiers shared across the runtime
//!
//! # Example
//!
//! ```
//! use weft_core::{Channel, Value};
//!
//! let chan = Channel::create(3, 256).unwrap();
//! chan.send(&Value::int(1)).unwrap();
//! chan.close();
//!
//! let received: Vec<_> = chan.drain().collect::<Result<_, _>>().unwrap();
//! assert_eq!(received, vec![Value::int(1)]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod sizing;
pub mod types;
pub mod value;

pub use channel::{Channel, ChannelConfig, ChannelStatus, Drain};
pub use error::{Result, WeftError};
pub use types::{ChannelId, TaskId, WorkerId};
pub use value::Value;
