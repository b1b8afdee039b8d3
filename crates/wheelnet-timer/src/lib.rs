//! # wheelnet-timer
//!
//! A four-level hierarchical timing wheel: `O(1)` schedule, `O(1)` cancel,
//! amortised `O(1)` expiry via cascading. See [`wheel::TimingWheel`].

pub mod wheel;

pub use wheel::{TimerId, TimingWheel, WheelConfig};
