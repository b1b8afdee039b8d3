//! Linux tun device creation and interface configuration.
//!
//! Grounded directly on `original_source/lib/tun/os/Linux/TunIface.cpp`'s
//! `osCreateTunDevice` (open `/dev/net/tun`, `TUNSETIFF` with
//! `IFF_TUN | IFF_NO_PI`, optional `SIOCSIFTXQLEN`) and
//! `TunIfaceDev::configureIface` (MTU floor, bring the interface up). The
//! source's `NetManager` abstraction (netlink-backed, with an async cache)
//! has no counterpart in this crate; we go straight to the same ioctls
//! `strata-bonding::net::util::resolve_iface_ipv4` already uses raw `libc`
//! calls for (`getifaddrs`), in the same direct-FFI style. The
//! `tun.ko`-loading fallback in the source (reading a `.ko`/`.ko.gz` from
//! well-known paths and calling `init_module`) is out of scope here: every
//! target this crate runs on ships the tun module built in or already
//! loaded, and hand-loading kernel modules is not something a userspace
//! networking runtime should be doing as a normal startup path.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use wheelnet_core::error::Code;

const TUN_DEV_PATH: &str = "/dev/net/tun";

/// `linux/if_tun.h`: `_IOW('T', 202, int)`.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
/// `linux/if_tun.h`.
const IFF_TUN: libc::c_short = 0x0001;
/// `linux/if_tun.h`.
const IFF_NO_PI: libc::c_short = 0x1000;

/// `linux/sockios.h`.
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
const SIOCSIFMTU: libc::c_ulong = 0x8922;
const SIOCSIFTXQLEN: libc::c_ulong = 0x8943;

/// `net/if.h`.
const IFF_UP: libc::c_short = 0x1;

/// The lowest MTU this crate will configure on a tun device (spec's MTU
/// floor); requests below this are clamped up to it.
pub const MIN_MTU: u16 = 512;

#[repr(C)]
union IfReqData {
    flags: libc::c_short,
    mtu: libc::c_int,
    qlen: libc::c_int,
    addr: libc::sockaddr,
}

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: IfReqData,
}

impl IfReq {
    fn named(name: &str) -> io::Result<Self> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
        }
        let mut req: IfReq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }
        Ok(req)
    }
}

/// A freshly created, not-yet-configured tun device.
pub struct CreatedDevice {
    pub fd: RawFd,
    pub name: String,
}

/// Opens `/dev/net/tun` and attaches a new `IFF_TUN | IFF_NO_PI` interface,
/// optionally setting its kernel transmit queue length.
/// Mirrors `osCreateTunDevice`.
pub fn create_tun_device(tx_queue_length: Option<u32>) -> Result<CreatedDevice, Code> {
    let path = CString::new(TUN_DEV_PATH).unwrap();
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        tracing::warn!(error = %io::Error::last_os_error(), "wheelnet-tun: failed to open {}", TUN_DEV_PATH);
        return Err(Code::OpenFailed);
    }

    let mut req = IfReq::named("").map_err(|_| Code::InvalidParameter)?;
    req.data.flags = IFF_TUN | IFF_NO_PI;

    if unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut req) } < 0 {
        tracing::warn!(error = %io::Error::last_os_error(), "wheelnet-tun: TUNSETIFF failed");
        unsafe { libc::close(fd) };
        return Err(Code::IoctlFailed);
    }

    let name = unsafe { std::ffi::CStr::from_ptr(req.name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    if let Some(qlen) = tx_queue_length {
        if let Err(e) = set_tx_queue_length(&name, qlen) {
            tracing::warn!(iface = %name, error = %e, "wheelnet-tun: failed to set tx queue length");
            unsafe { libc::close(fd) };
            return Err(Code::IoctlFailed);
        }
    }

    tracing::info!(iface = %name, fd, "wheelnet-tun: tun device created");
    Ok(CreatedDevice { fd, name })
}

fn ioctl_socket() -> io::Result<RawFd> {
    let s = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if s < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(s)
}

fn set_tx_queue_length(iface: &str, qlen: u32) -> io::Result<()> {
    let sock = ioctl_socket()?;
    let mut req = IfReq::named(iface)?;
    req.data.qlen = qlen as libc::c_int;
    let ret = unsafe { libc::ioctl(sock, SIOCSIFTXQLEN as _, &mut req) };
    unsafe { libc::close(sock) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sets the interface MTU (clamped to [`MIN_MTU`]) if `mtu` is given, then
/// brings the interface up. Returns the interface's kernel index, found via
/// `if_nametoindex` rather than a cached netlink snapshot — the tun device
/// interface didn't exist before this call, so any cache would be stale
/// (mirrors the source's "uncached route query" comment in
/// `configureIface`).
pub fn configure_iface(name: &str, mtu: Option<u16>) -> Result<i32, Code> {
    let sock = ioctl_socket().map_err(|_| Code::SocketFailed)?;
    let result = configure_iface_with_socket(sock, name, mtu);
    unsafe { libc::close(sock) };
    result
}

fn configure_iface_with_socket(sock: RawFd, name: &str, mtu: Option<u16>) -> Result<i32, Code> {
    if let Some(requested) = mtu {
        let effective = requested.max(MIN_MTU);
        let mut req = IfReq::named(name).map_err(|_| Code::InvalidParameter)?;
        req.data.mtu = effective as libc::c_int;
        if unsafe { libc::ioctl(sock, SIOCSIFMTU as _, &mut req) } < 0 {
            tracing::warn!(iface = name, mtu = effective, error = %io::Error::last_os_error(), "wheelnet-tun: SIOCSIFMTU failed");
            return Err(Code::IoctlFailed);
        }
    }

    let mut req = IfReq::named(name).map_err(|_| Code::InvalidParameter)?;
    if unsafe { libc::ioctl(sock, SIOCGIFFLAGS as _, &mut req) } < 0 {
        return Err(Code::IoctlFailed);
    }
    let current_flags = unsafe { req.data.flags };
    req.data.flags = current_flags | IFF_UP;
    if unsafe { libc::ioctl(sock, SIOCSIFFLAGS as _, &mut req) } < 0 {
        tracing::warn!(iface = name, error = %io::Error::last_os_error(), "wheelnet-tun: bringing interface up failed");
        return Err(Code::IoctlFailed);
    }

    let cname = CString::new(name).map_err(|_| Code::InvalidParameter)?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        return Err(Code::NotFound);
    }

    tracing::info!(iface = name, ifindex = idx, mtu = ?mtu, "wheelnet-tun: interface configured and brought up");
    Ok(idx as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_below_floor_is_clamped_up() {
        assert_eq!(200u16.max(MIN_MTU), MIN_MTU);
        assert_eq!(1500u16.max(MIN_MTU), 1500);
    }

    // Creating a real tun device needs CAP_NET_ADMIN, which CI/sandboxed
    // test runners won't have; exercised instead in `tun.rs`'s
    // `#[ignore]`-gated integration test.
}
