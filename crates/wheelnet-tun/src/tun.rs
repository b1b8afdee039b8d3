//! The tun interface itself: lifecycle, read loop, rate monitoring.
//!
//! Grounded on `original_source/lib/net/TunIface.{hpp,cpp}` (the owner
//! callback contract, rate monitoring) and `lib/tun/TunIfaceDev.{hpp,cpp}`
//! (`startManaged`/`startUnmanaged`/`setupFd`/`configureMemPool`,
//! `receiveFdEvent`'s bounded read loop). The source's `simpleRef`/
//! `simpleUnref` pair ("hold a reference to ourself while we try to read
//! multiple times" so an owner callback invoked mid-loop can't free the
//! object out from under the loop) has no destructor-ordering equivalent
//! in Rust: `TunIface::handle_fd_event` takes `&Rc<RefCell<Self>>`
//! (cloned for the duration of the call) rather than plain `&mut self`,
//! which keeps the same object alive across the whole read burst even if
//! an owner callback drops its own last `Rc` to it mid-loop.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use wheelnet_core::error::Code;
use wheelnet_core::handle::BufferHandle;
use wheelnet_core::packet_store::{PacketStore, PacketStoreConfig};
use wheelnet_core::pool::{Pool, PoolConfig};
use wheelnet_core::time::{CurrentTime, Time};
use wheelnet_reactor::{EventLoop, EventMask, FdHandler};

use crate::device::{self, MIN_MTU};
use crate::prefix::{AddressFamilyPrefix, Framing, NoPrefix};
use crate::writer::{PacketWriter, QueuedFrame};

/// Default full-size packet payload, used as the threshold below which a
/// tun interface's MTU needs no dedicated memory pool. Mirrors
/// `PacketDataStore::PacketSize` in `configureMemPool`.
const DEFAULT_PACKET_SIZE: usize = 2048;

/// Slabs budgeted for a tun interface's dedicated pool, mirroring
/// `PacketMaxSlabs` in the source.
const TUN_POOL_MAX_SLABS: usize = 16;

/// Receives callbacks from a [`TunIface`]. Mirrors `TunIfaceOwner`.
pub trait TunIfaceOwner {
    /// A packet was read from the tunnel.
    fn tun_packet_read(&mut self, packet: BufferHandle);

    /// The tunnel closed (error, or `stop()`).
    fn tun_closed(&mut self);

    /// A new send/receive rate measurement is available (bytes/sec).
    fn tun_rate_update(&mut self, send_rate: u32, recv_rate: u32, since: Time) {
        let _ = (send_rate, recv_rate, since);
    }
}

/// Configuration knobs under `os.tun.*` (spec §6).
#[derive(Debug, Clone)]
pub struct TunConfig {
    pub max_reads_per_event: u8,
    pub async_writes: bool,
    pub write_queue_size: u16,
    pub tx_queue_length: Option<u32>,
    pub max_memory_mb: u32,
    /// Seconds between rate measurements; `0` disables rate monitoring.
    pub rate_interval: u32,
}

impl Default for TunConfig {
    fn default() -> Self {
        TunConfig {
            max_reads_per_event: 64,
            async_writes: false,
            write_queue_size: 16,
            tx_queue_length: None,
            max_memory_mb: 16,
            rate_interval: 0,
        }
    }
}

enum PacketSource {
    Store(Rc<PacketStore>),
    Custom(Pool),
}

impl PacketSource {
    fn get(&self, hint_size: usize) -> BufferHandle {
        match self {
            PacketSource::Store(store) => store.get_packet(hint_size),
            PacketSource::Custom(pool) => pool.acquire(true),
        }
    }
}

/// A tun device bound to the reactor, reading into a memory pool and
/// delivering packets to a [`TunIfaceOwner`].
pub struct TunIface<O: TunIfaceOwner> {
    owner: Rc<RefCell<O>>,
    fd: Option<RawFd>,
    /// Set when the read loop discovers the tunnel is gone (EOF/hard
    /// error) so the owner can deregister+close it from the event loop it
    /// holds. The read loop itself has no reference back to the
    /// `EventLoop` that dispatched into it, so it can stop reading and
    /// notify the owner, but the final `close_fd` has to happen on the
    /// owner's side of the callback (see [`Self::take_closed_fd`]).
    needs_reactor_cleanup: Option<RawFd>,
    iface_name: String,
    iface_id: i32,
    mtu: u16,
    source: PacketSource,
    writer: Option<PacketWriter>,
    framing: Box<dyn Framing>,
    config: TunConfig,
    clock: CurrentTime,
    last_rate_update: Time,
    send_bytes: u32,
    recv_bytes: u32,
}

impl<O: TunIfaceOwner + 'static> TunIface<O> {
    /// Creates and configures a new tun device, bringing the interface up
    /// ("managed" mode — the tunnel owns its own addresses and lifecycle).
    /// Mirrors `TunIfaceDev::startManaged`.
    pub fn start_managed(
        owner: Rc<RefCell<O>>,
        event_loop: &mut EventLoop,
        packet_store: Rc<PacketStore>,
        requested_mtu: Option<u16>,
        config: TunConfig,
    ) -> Result<Rc<RefCell<Self>>, Code> {
        let created = device::create_tun_device(config.tx_queue_length)?;
        let iface_id = match device::configure_iface(&created.name, requested_mtu) {
            Ok(id) => id,
            Err(e) => {
                unsafe { libc::close(created.fd) };
                return Err(e);
            }
        };

        let mtu = requested_mtu.map(|m| m.max(MIN_MTU)).unwrap_or(0);
        let source = Self::build_source(mtu, &config, packet_store);

        let writer = if config.async_writes {
            PacketWriter::new_threaded(created.fd, config.write_queue_size as usize)
        } else {
            PacketWriter::new_sync(created.fd)
        };

        let iface = Rc::new(RefCell::new(TunIface {
            owner,
            fd: Some(created.fd),
            needs_reactor_cleanup: None,
            iface_name: created.name,
            iface_id,
            mtu,
            source,
            writer: Some(writer),
            framing: Self::framing_for_platform(),
            config,
            clock: CurrentTime::new(),
            last_rate_update: Time::zero(),
            send_bytes: 0,
            recv_bytes: 0,
        }));

        Self::register(&iface, event_loop, created.fd);
        Ok(iface)
    }

    /// Adopts an already-open, already-configured FD ("unmanaged" mode).
    /// Mirrors `TunIfaceDev::startUnmanaged`.
    pub fn start_unmanaged(
        owner: Rc<RefCell<O>>,
        event_loop: &mut EventLoop,
        packet_store: Rc<PacketStore>,
        fd: RawFd,
        iface_mtu: Option<u16>,
        config: TunConfig,
    ) -> Result<Rc<RefCell<Self>>, Code> {
        if fd < 0 {
            return Err(Code::InvalidParameter);
        }
        let mtu = iface_mtu.map(|m| m.max(MIN_MTU)).unwrap_or(0);
        let source = Self::build_source(mtu, &config, packet_store);

        let writer = if config.async_writes {
            PacketWriter::new_threaded(fd, config.write_queue_size as usize)
        } else {
            PacketWriter::new_sync(fd)
        };

        let iface = Rc::new(RefCell::new(TunIface {
            owner,
            fd: Some(fd),
            needs_reactor_cleanup: None,
            iface_name: String::new(),
            iface_id: -1,
            mtu,
            source,
            writer: Some(writer),
            framing: Self::framing_for_platform(),
            config,
            clock: CurrentTime::new(),
            last_rate_update: Time::zero(),
            send_bytes: 0,
            recv_bytes: 0,
        }));

        Self::register(&iface, event_loop, fd);
        Ok(iface)
    }

    #[cfg(target_os = "linux")]
    fn framing_for_platform() -> Box<dyn Framing> {
        Box::new(NoPrefix)
    }

    #[cfg(not(target_os = "linux"))]
    fn framing_for_platform() -> Box<dyn Framing> {
        Box::new(AddressFamilyPrefix)
    }

    fn build_source(mtu: u16, config: &TunConfig, packet_store: Rc<PacketStore>) -> PacketSource {
        if mtu as usize <= DEFAULT_PACKET_SIZE {
            return PacketSource::Store(packet_store);
        }
        // Dedicated pool sized per spec §4.7:
        // budget_MB * 2^20 / (max_slabs * (MTU + header_offset)).
        let header_offset = PacketStoreConfig::default().regular_payload_size.saturating_sub(DEFAULT_PACKET_SIZE).max(64);
        let blocks_per_slab = ((config.max_memory_mb as usize * 1024 * 1024)
            / TUN_POOL_MAX_SLABS
            / (mtu as usize + header_offset))
            .max(1);
        PacketSource::Custom(Pool::new(PoolConfig {
            payload_size: mtu as usize,
            blocks_per_slab,
            max_slabs: TUN_POOL_MAX_SLABS,
            mem_tag: 3,
        }))
    }

    fn register(iface: &Rc<RefCell<Self>>, event_loop: &mut EventLoop, fd: RawFd) {
        let handler: Rc<RefCell<dyn FdHandler>> = iface.clone();
        event_loop.set_handler(fd, handler, EventMask::READ);
    }

    pub fn iface_name(&self) -> &str {
        &self.iface_name
    }

    pub fn iface_id(&self) -> i32 {
        self.iface_id
    }

    pub fn is_managed(&self) -> bool {
        self.iface_id >= 0
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn is_initialized(&self) -> bool {
        self.fd.is_some()
    }

    /// Queues `packet` (a raw IP datagram) for writing. Mirrors
    /// `TunIfaceDev::sendPacket`.
    pub fn send_packet(&mut self, ip_version: u8, packet: BufferHandle) -> Result<(), Code> {
        let Some(_) = self.fd else {
            return Err(Code::NotInitialized);
        };
        if packet.is_empty() {
            return Err(Code::InvalidParameter);
        }
        let prefix = self.framing.write_prefix(ip_version);
        let len = packet.len();
        let writer = self.writer.as_mut().ok_or(Code::NotInitialized)?;
        let result = writer.write(QueuedFrame { prefix, packet });
        if result.is_ok() {
            self.update_send_count(len as u32);
        }
        result
    }

    fn update_send_count(&mut self, len: u32) {
        if self.config.rate_interval == 0 {
            return;
        }
        let now = self.clock.now();
        if now.as_millis() >= self.last_rate_update.as_millis() + (self.config.rate_interval as u64 * 1000) {
            self.do_rate_update(now);
        }
        self.send_bytes += len;
    }

    /// Mirrors `TunIface::doRateUpdate`.
    fn do_rate_update(&mut self, now: Time) {
        let elapsed_ms = now.as_millis().saturating_sub(self.last_rate_update.as_millis()).max(1);
        let send_rate = ((self.send_bytes as u64 * 1000) / elapsed_ms) as u32;
        let recv_rate = ((self.recv_bytes as u64 * 1000) / elapsed_ms) as u32;
        let since = self.last_rate_update;
        self.send_bytes = 0;
        self.recv_bytes = 0;
        self.last_rate_update = now;
        self.owner.borrow_mut().tun_rate_update(send_rate, recv_rate, since);
    }

    /// Marks the tunnel as gone without closing the FD directly: the
    /// reactor still has it registered, so the actual `close(2)` has to go
    /// through [`EventLoop::close_fd`] to drop the epoll registration at
    /// the same time (stray readiness on a stale FD number otherwise
    /// keeps waking this handler). See [`Self::take_closed_fd`].
    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            self.needs_reactor_cleanup = Some(fd);
        }
        self.writer = None;
    }

    /// Returns the FD that needs `event_loop.close_fd(fd)` called on it,
    /// if the read loop discovered the tunnel died. Call this once in
    /// response to [`TunIfaceOwner::tun_closed`]; a second call (or one
    /// when the tunnel is still alive) returns `None`.
    pub fn take_closed_fd(&mut self) -> Option<RawFd> {
        self.needs_reactor_cleanup.take()
    }

    /// Owner-initiated shutdown: deregisters and closes the FD
    /// immediately. Mirrors `TunIfaceDev::stop`.
    pub fn stop(&mut self, event_loop: &mut EventLoop) {
        if let Some(fd) = self.fd.take() {
            event_loop.close_fd(fd);
        }
        self.writer = None;
    }
}

impl<O: TunIfaceOwner + 'static> FdHandler for TunIface<O> {
    /// Mirrors `TunIfaceDev::receiveFdEvent`'s read loop: acquire a
    /// packet block, read into it, strip framing, deliver, repeat up to
    /// `max_reads_per_event` or until a read reports no more data.
    fn handle_fd_event(&mut self, _fd: RawFd, _events: EventMask) {
        if self.fd.is_none() {
            // Already closed from an earlier dispatch; nothing left to do
            // until the owner calls `take_closed_fd` and deregisters us.
            return;
        }

        for _ in 0..self.config.max_reads_per_event {
            let Some(fd) = self.fd else { break };

            let hint = if self.mtu > 0 { self.mtu as usize } else { DEFAULT_PACKET_SIZE };
            let mut buf = self.source.get(hint);
            if buf.is_empty() {
                tracing::warn!(iface = %self.iface_name, "wheelnet-tun: out of memory to read from tun");
                break;
            }

            let cap = buf.len();
            let slice = match buf.as_mut_slice() {
                Some(s) => s,
                None => break,
            };
            let ret = unsafe { libc::read(fd, slice.as_mut_ptr() as *mut _, cap) };

            if ret == 0 {
                tracing::info!(iface = %self.iface_name, "wheelnet-tun: tunnel interface closed");
                self.close();
                break;
            }
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    break;
                }
                tracing::warn!(iface = %self.iface_name, error = %err, "wheelnet-tun: read error, closing");
                self.close();
                break;
            }

            let n = ret as usize;
            let truncated = buf.sub_handle(0, n);
            self.recv_bytes += n as u32;
            match self.framing.strip_read_prefix(truncated) {
                Some(packet) => self.owner.borrow_mut().tun_packet_read(packet),
                None => {
                    tracing::warn!(iface = %self.iface_name, "wheelnet-tun: short read, dropping frame");
                }
            }
        }

        if self.fd.is_none() {
            self.owner.borrow_mut().tun_closed();
        }
    }
}
