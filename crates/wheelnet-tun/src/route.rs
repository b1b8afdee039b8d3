//! Interface shape for a route-table monitor pluggable into the event
//! loop. The netlink route-management control plane itself is out of
//! scope — this only specifies the contract a concrete backend (netlink
//! on Linux, a routing socket on BSD) would satisfy to plug into
//! [`wheelnet_reactor::EventLoop`] the same way [`crate::tun::TunIface`]
//! does: one readiness-driven FD, parsed events delivered to an owner.
//!
//! Grounded on `NetManagerImpl`'s `NetlinkRouteMonitor::Owner` callbacks
//! (`netlinkRcvRouteResults`/`netlinkRouteReqFailed`/
//! `netlinkRouteMonitorFailed`) and `NetlinkAsyncRouteControl`'s
//! `addRoute`/`removeRoute` request shape
//! (`lib/netmgr/os/shared/netlink/NetManagerImpl.hpp`,
//! `NetlinkAsyncRouteControl.hpp`).

use std::net::IpAddr;
use std::os::unix::io::RawFd;

use wheelnet_core::error::Code;
use wheelnet_reactor::FdHandler;

/// One observed change to the system route or address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    AddressAdded { iface_id: i32, address: IpAddr },
    AddressRemoved { iface_id: i32, address: IpAddr },
    RouteAdded { dst: IpAddr, prefix_len: u8, iface_id: i32 },
    RouteRemoved { dst: IpAddr, prefix_len: u8, iface_id: i32 },
    LinkUp { iface_id: i32 },
    LinkDown { iface_id: i32 },
}

/// Receives parsed route-table changes and async request outcomes from a
/// [`RouteMonitor`]. Mirrors `NetlinkRouteMonitor::Owner`.
pub trait RouteMonitorOwner {
    fn route_event(&mut self, event: RouteEvent);

    /// An `add_route`/`remove_route` request identified by `seq` failed.
    fn route_request_failed(&mut self, seq: u32, code: Code) {
        let _ = (seq, code);
    }

    /// The monitor's underlying socket died; no further events will
    /// arrive until the owner re-establishes one.
    fn route_monitor_failed(&mut self) {}
}

/// What a concrete route-table backend registers with the event loop as.
/// No implementation ships here — see the module doc comment.
pub trait RouteMonitor: FdHandler {
    fn fd(&self) -> RawFd;
}

/// Asynchronous route mutation, the "produces route-table updates" half
/// of component K. Each call returns a sequence number; the outcome
/// arrives later via [`RouteMonitorOwner::route_request_failed`] (success
/// is implicit — no failure callback fires).
pub trait RouteControl {
    #[allow(clippy::too_many_arguments)]
    fn add_route(
        &mut self,
        dst: IpAddr,
        prefix_len: u8,
        gateway: Option<IpAddr>,
        iface_id: Option<i32>,
        metric: i32,
    ) -> u32;

    #[allow(clippy::too_many_arguments)]
    fn remove_route(
        &mut self,
        dst: IpAddr,
        prefix_len: u8,
        gateway: Option<IpAddr>,
        iface_id: Option<i32>,
        metric: i32,
    ) -> u32;
}
