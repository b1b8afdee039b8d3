//! # wheelnet-core
//!
//! The zero-copy data plane substrate shared by every other `wheelnet`
//! crate: a slab-allocated memory pool, reference-counted buffer handles
//! over pool or heap memory, a scatter/gather vector for zero-copy
//! append/consume/rewrite, a two-tier packet data store, and the small
//! time/loss/RTT value types the rest of the runtime builds on.
//!
//! ## Crate structure
//!
//! - [`time`] — monotonic time value type and clock source
//! - [`error`] — shared status code + typed error wrapper
//! - [`block`] — pool/heap memory block header and kind
//! - [`pool`] — slab-allocated fixed-size block pool
//! - [`handle`] — reference-counted buffer handle over a block
//! - [`vector`] — scatter/gather vector of handles
//! - [`packet_store`] — process-wide two-tier packet pool
//! - [`loss`] — circular packet-loss sample counter
//! - [`rtt`] — RFC-6298 smoothed RTT estimator

pub mod block;
pub mod error;
pub mod handle;
pub mod loss;
pub mod packet_store;
pub mod pool;
pub mod rtt;
pub mod time;
pub mod vector;

pub use error::{Code, WheelnetError};
pub use handle::BufferHandle;
pub use pool::{Pool, PoolConfig, PoolStats};
pub use time::{CurrentTime, Time};
pub use vector::ScatterVector;
