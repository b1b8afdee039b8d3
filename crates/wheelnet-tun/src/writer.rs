//! The tun device's write path: a bounded per-tunnel queue drained either
//! synchronously on the event-loop thread or by a dedicated writer thread.
//!
//! Grounded on `TunIfaceDev::sendPacket`/the `PacketWriter` it delegates
//! to (`os.tun.async_writes`, `os.tun.write_queue_size`): composes an
//! iovec (optional AF prefix + packet payload), pushes it into a bounded
//! queue, and the writer is "responsible for its own kernel back-pressure
//! handling and for re-arming write interest on EAGAIN" (spec §4.7). The
//! threaded mode reuses `crossbeam_channel::bounded`, the same cross-thread
//! handoff primitive `wheelnet-reactor::queue` and
//! `strata-bonding::runtime` already use.

use std::os::unix::io::RawFd;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use wheelnet_core::error::Code;
use wheelnet_core::handle::BufferHandle;

/// One frame queued for writing: an optional AF prefix plus the IP
/// datagram, written with a single `writev`.
pub struct QueuedFrame {
    pub prefix: Option<[u8; 4]>,
    pub packet: BufferHandle,
}

impl QueuedFrame {
    fn iovecs(&self, prefix_buf: &mut [u8; 4]) -> [libc::iovec; 2] {
        if let Some(p) = self.prefix {
            *prefix_buf = p;
        }
        [
            libc::iovec { iov_base: prefix_buf.as_mut_ptr() as *mut _, iov_len: if self.prefix.is_some() { 4 } else { 0 } },
            libc::iovec {
                iov_base: self.packet.as_slice().as_ptr() as *mut _,
                iov_len: self.packet.len(),
            },
        ]
    }
}

fn writev_frame(fd: RawFd, frame: &QueuedFrame) -> Result<(), Code> {
    let mut prefix_buf = [0u8; 4];
    let iovecs = frame.iovecs(&mut prefix_buf);
    let total: usize = iovecs.iter().map(|v| v.iov_len).sum();
    let iov_start = if iovecs[0].iov_len == 0 { 1 } else { 0 };
    let ret = unsafe { libc::writev(fd, iovecs[iov_start..].as_ptr(), (2 - iov_start) as libc::c_int) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Code::SoftFail);
        }
        return Err(Code::WriteFailed);
    }
    if (ret as usize) < total {
        return Err(Code::IncompleteWrite);
    }
    Ok(())
}

/// Drains frames against a tun FD, either inline (sync mode) or via a
/// background thread (`os.tun.async_writes`).
pub enum PacketWriter {
    Sync { fd: RawFd },
    Threaded { sender: Sender<QueuedFrame>, _worker: std::thread::JoinHandle<()> },
}

impl PacketWriter {
    /// Synchronous writer: every [`Self::write`] call goes straight to
    /// `writev` on the calling (event-loop) thread.
    pub fn new_sync(fd: RawFd) -> Self {
        PacketWriter::Sync { fd }
    }

    pub fn new_threaded(fd: RawFd, queue_depth: usize) -> Self {
        let (sender, receiver): (Sender<QueuedFrame>, Receiver<QueuedFrame>) = bounded(queue_depth);
        let worker = std::thread::Builder::new()
            .name("wheelnet-tun-writer".into())
            .spawn(move || {
                while let Ok(frame) = receiver.recv() {
                    // The worker thread blocks on its own retries; the fd
                    // is non-blocking so a SoftFail here just means we spin
                    // briefly rather than saturate a core under backpressure
                    // that's expected to clear quickly.
                    loop {
                        match writev_frame(fd, &frame) {
                            Ok(()) => break,
                            Err(Code::SoftFail) => std::thread::yield_now(),
                            Err(_) => break,
                        }
                    }
                }
            })
            .expect("failed to spawn tun writer thread");
        PacketWriter::Threaded { sender, _worker: worker }
    }

    /// Enqueues `frame` for writing. Synchronous mode writes immediately
    /// (or returns `SoftFail` if the kernel buffer is full, same as the
    /// source's non-blocking write contract); threaded mode only reports
    /// `SoftFail` if the bounded channel itself is full.
    pub fn write(&mut self, frame: QueuedFrame) -> Result<(), Code> {
        match self {
            PacketWriter::Sync { fd, .. } => writev_frame(*fd, &frame),
            PacketWriter::Threaded { sender, .. } => match sender.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(Code::SoftFail),
                Err(TrySendError::Disconnected(_)) => Err(Code::Closed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_writer_writes_through_a_pipe() {
        let mut fds = [0i32; 2];
        unsafe { libc::pipe(fds.as_mut_ptr()) };
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut writer = PacketWriter::new_sync(write_fd);
        let mut packet = BufferHandle::from_heap(4);
        packet.as_mut_slice().unwrap().copy_from_slice(&[1, 2, 3, 4]);
        writer.write(QueuedFrame { prefix: None, packet }).unwrap();

        let mut buf = [0u8; 4];
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut _, 4) };
        assert_eq!(n, 4);
        assert_eq!(buf, [1, 2, 3, 4]);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn sync_writer_includes_the_af_prefix() {
        let mut fds = [0i32; 2];
        unsafe { libc::pipe(fds.as_mut_ptr()) };
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut writer = PacketWriter::new_sync(write_fd);
        let mut packet = BufferHandle::from_heap(2);
        packet.as_mut_slice().unwrap().copy_from_slice(&[0xaa, 0xbb]);
        writer.write(QueuedFrame { prefix: Some([0, 0, 0, 2]), packet }).unwrap();

        let mut buf = [0u8; 6];
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut _, 6) };
        assert_eq!(n, 6);
        assert_eq!(buf, [0, 0, 0, 2, 0xaa, 0xbb]);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
