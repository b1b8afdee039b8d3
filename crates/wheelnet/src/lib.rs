//! # wheelnet
//!
//! The facade that ties the rest of the workspace into one runtime: the
//! `os.*` configuration surface ([`config`]), process resource limits
//! ([`limits`]), and a [`runtime::Runtime`] wiring the packet store,
//! timer wheel and event loop together for callers that want a tunnel
//! device running against a real reactor without assembling the pieces
//! themselves.
//!
//! ## Crate structure
//!
//! - [`config`] — `RuntimeConfig`, parsed from TOML via `*Input` structs
//! - [`limits`] — `setrlimit(RLIMIT_AS)`/`setrlimit(RLIMIT_NOFILE)`
//! - [`runtime`] — [`runtime::Runtime`], the assembled loop + packet store
//!
//! Re-exports the constituent crates' key types so a caller only needs
//! this one crate for the common case.

pub mod config;
pub mod limits;
pub mod runtime;

pub use config::{RuntimeConfig, RuntimeConfigInput};
pub use runtime::Runtime;

pub use wheelnet_core::error::{Code, WheelnetError};
pub use wheelnet_core::handle::BufferHandle;
pub use wheelnet_core::packet_store::PacketStore;
pub use wheelnet_reactor::{EventLoop, FdHandler, StopReason};
pub use wheelnet_timer::TimerId;
pub use wheelnet_tun::{RouteControl, RouteEvent, RouteMonitor, RouteMonitorOwner, TunConfig, TunIface, TunIfaceOwner};
