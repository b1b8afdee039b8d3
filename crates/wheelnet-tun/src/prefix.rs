//! OS-specific framing applied to every packet read from or written to a
//! tun device.
//!
//! Linux carries no framing (`IFF_NO_PI`): the raw IP datagram is the
//! whole frame. macOS/BSD/QNX tun variants prepend a 4-byte, big-endian,
//! zero-padded address-family code ahead of the datagram on both read and
//! write. Grounded on
//! `original_source/lib/tun/os/shared/PrefixTunReadWrite.cpp`: the AF code
//! (`AF_INET` / `AF_INET6`) lands in the *last* byte of the 4-byte prefix
//! (`mem[TUN_PREFIX_SIZE - 1] = addrFamily`), the other three bytes left
//! zeroed (see `DESIGN.md` Open Question decision 1).

use wheelnet_core::handle::BufferHandle;

pub const PREFIX_SIZE: usize = 4;

const AF_INET: u8 = 2;
const AF_INET6: u8 = 30;

/// How this platform's tun device frames packets.
pub trait Framing {
    /// Strips any OS-specific prefix from a freshly-read buffer, returning
    /// the IP datagram. Returns `None` if the buffer is too short to
    /// contain a valid frame (the caller should treat this as a read
    /// error, not a parse error to recover from).
    fn strip_read_prefix(&self, buf: BufferHandle) -> Option<BufferHandle>;

    /// The bytes (if any) to prepend ahead of an IPv4 or IPv6 datagram
    /// before handing it to `writev`. `ip_version` is 4 or 6.
    fn write_prefix(&self, ip_version: u8) -> Option<[u8; PREFIX_SIZE]>;
}

/// Linux: `IFF_NO_PI` means no per-packet header at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrefix;

impl Framing for NoPrefix {
    fn strip_read_prefix(&self, buf: BufferHandle) -> Option<BufferHandle> {
        Some(buf)
    }

    fn write_prefix(&self, _ip_version: u8) -> Option<[u8; PREFIX_SIZE]> {
        None
    }
}

/// macOS/BSD/QNX-style tun devices: every frame carries a 4-byte
/// big-endian address-family prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFamilyPrefix;

impl Framing for AddressFamilyPrefix {
    fn strip_read_prefix(&self, buf: BufferHandle) -> Option<BufferHandle> {
        if buf.len() <= PREFIX_SIZE {
            return None;
        }
        Some(buf.sub_handle(PREFIX_SIZE, buf.len() - PREFIX_SIZE))
    }

    fn write_prefix(&self, ip_version: u8) -> Option<[u8; PREFIX_SIZE]> {
        let af = match ip_version {
            4 => AF_INET,
            6 => AF_INET6,
            _ => return None,
        };
        let mut prefix = [0u8; PREFIX_SIZE];
        prefix[PREFIX_SIZE - 1] = af;
        Some(prefix)
    }
}
