//! WEFT Runtime Library
//!
//! The control plane of the WEFT concurrency runtime: a pool of OS-thread
//! workers executing registered tasks, channel registration broadcast, and
//! the WaitGroup aggregation primitive.
//!
//! # Overview
//!
//! Task bodies are registered by stable name in a [`TaskRegistry`] before
//! the pool starts; a submission is just `(name, arguments)`. Tasks that
//! talk to shared channels use the distinct shared entry point and receive
//! a [`ChannelLookup`] view as their first parameter; nothing is decided by
//! inspecting task bodies.
//!
//! # Example
//!
//! ```no_run
//! use weft_core::Value;
//! use weft_runtime::{Pool, TaskRegistry};
//!
//! # async fn demo() -> weft_core::Result<()> {
//! let mut registry = TaskRegistry::new();
//! registry.register("square", |args| {
//!     let n = args[0].as_i64().unwrap_or(0);
//!     Ok(Value::int(n * n))
//! });
//!
//! let pool = Pool::new(registry)?;
//! let handle = pool.submit("square", vec![Value::int(7)])?;
//! assert_eq!(handle.join().await?, Value::int(49));
//! pool.terminate().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pool;
pub mod registry;
pub mod waitgroup;
mod worker;

pub use pool::{Pool, PoolConfig, PoolStats, TaskHandle};
pub use registry::{ChannelLookup, TaskRegistry};
pub use waitgroup::WaitGroup;
