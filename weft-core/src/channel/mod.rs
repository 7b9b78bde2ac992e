//! Shared-memory channels.
//!
//! A channel's entire state lives in one anonymously-mapped region readable
//! and writable by every execution context. A small header of atomic words
//! coordinates the ring; slot payloads are written exclusively by the sender
//! that committed them and read exclusively by the receiver that consumed
//! them.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (28 bytes, seven little-endian u32 atomic words)      │
//! │   capacity │ write_index │ read_index │ closed │ slot_size   │
//! │   waiting_senders │ waiting_receivers                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot storage (max(capacity, 1) × slot_size bytes)            │
//! │ ┌──────────────────────────────────────────────────────────┐ │
//! │ │ Slot 0: [len: u32 LE][payload: len bytes]                │ │
//! │ ├──────────────────────────────────────────────────────────┤ │
//! │ │ Slot 1: [len: u32 LE][payload: len bytes]                │ │
//! │ ├──────────────────────────────────────────────────────────┤ │
//! │ │ ...                                                      │ │
//! │ └──────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Waiting
//!
//! Blocked senders and receivers park on a mutex/condvar pair attached to
//! the region, one per direction, with every wait bounded at 10 ms before
//! the header preconditions are re-checked. The `waiting_senders` and
//! `waiting_receivers` header words advertise parked peers; the rendezvous
//! handshake reads them to decide when a commit may proceed.

mod drain;
mod header;
mod region;
mod ring;

pub use drain::Drain;
pub use header::{ChannelStatus, HEADER_SIZE, MIN_SLOT_SIZE};
pub use ring::{Channel, ChannelConfig};
