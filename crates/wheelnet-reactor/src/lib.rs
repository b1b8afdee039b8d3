//! # wheelnet-reactor
//!
//! A single-threaded, per-thread readiness event loop: FD multiplexing
//! (epoll), the hierarchical timer wheel from [`wheelnet_timer`], process
//! signal delivery, end-of-loop/shutdown subscriptions, child-process
//! reaping, and a cross-thread task queue for handing work to the loop's
//! owning thread from anywhere else in the process.
//!
//! ## Crate structure
//!
//! - [`reactor`] — [`reactor::EventLoop`], the loop itself
//! - [`backend`] — the [`backend::Backend`] trait and its `epoll` impl
//! - [`mask`] — [`mask::EventMask`], the readiness bitmask
//! - [`signals`] — process-wide signal counters and child reaping
//! - [`queue`] — [`queue::TaskQueue`], the cross-thread task handoff

pub mod backend;
pub mod mask;
pub mod queue;
pub mod reactor;
pub mod signals;

pub use backend::{Backend, EpollBackend};
pub use mask::EventMask;
pub use queue::{ReceiverId, ReleasePolicy, TaskQueue};
pub use reactor::{ChildHandler, EventLoop, FdHandler, LoopEndHandler, ShutdownHandler, SignalHandler, StopReason};
pub use signals::{ChildStatus, Signal};
