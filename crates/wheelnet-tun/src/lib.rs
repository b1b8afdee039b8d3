//! # wheelnet-tun
//!
//! The kernel tun device data path: device creation/configuration,
//! OS-specific packet framing, the bounded read/write loop, rate
//! monitoring, and the IP checksum helper the tun path's callers need.
//!
//! ## Crate structure
//!
//! - [`tun`] — [`tun::TunIface`], the tunnel bound to a [`wheelnet_reactor::EventLoop`]
//! - [`device`] — Linux tun device creation and `ioctl`-based configuration
//! - [`prefix`] — per-platform packet framing ([`prefix::Framing`])
//! - [`writer`] — the bounded write queue, sync or threaded
//! - [`checksum`] — incremental ones-complement checksum
//! - [`route`] — route-table monitor interface shape (no netlink backend)

pub mod checksum;
pub mod device;
pub mod prefix;
pub mod route;
pub mod tun;
pub mod writer;

pub use checksum::{checksum, Checksum};
pub use route::{RouteControl, RouteEvent, RouteMonitor, RouteMonitorOwner};
pub use tun::{TunConfig, TunIface, TunIfaceOwner};
