//! Platform readiness backend.
//!
//! `original_source` implements this contract once per platform
//! (`EpollEventManager`, `KqueueEventManager`, `PollEventManager`,
//! `LibEventManager`, Windows' `SelectEventManager`). We implement the
//! Linux path — `epoll` — fully, grounded on
//! `original_source/lib/event/os/shared/epoll/EpollEventManager.cpp`, and
//! leave the trait as the seam a kqueue/poll backend would plug into
//! (documented gap, see `DESIGN.md`).

use std::io;
use std::os::unix::io::RawFd;

use crate::mask::EventMask;

/// One FD's readiness, as reported by a single `poll` call.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub events: EventMask,
}

/// A platform readiness multiplexer.
///
/// Registration (`set_handler`/`set_events`/`remove`) is owned entirely by
/// the backend; the reactor's FD table is a separate, backend-agnostic
/// bookkeeping structure layered on top (see `reactor::EventLoop`).
pub trait Backend {
    /// Starts monitoring `fd` for `events`. `fd` must not already be registered.
    fn set_handler(&mut self, fd: RawFd, events: EventMask) -> io::Result<()>;

    /// Changes the monitored events for an already-registered `fd`.
    /// `events.is_empty()` disarms monitoring without forgetting the slot.
    fn set_events(&mut self, fd: RawFd, events: EventMask) -> io::Result<()>;

    /// Stops monitoring `fd` entirely.
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks up to `timeout_ms` (`-1` = forever, `0` = don't block) for
    /// readiness, appending ready events to `out`. Returns the number
    /// appended.
    fn poll(&mut self, timeout_ms: i32, out: &mut Vec<ReadyEvent>) -> io::Result<usize>;

    /// The backend's own pollable FD, if it has one (epoll does; `poll(2)`
    /// would not). Used to fold the backend into a parent multiplexer.
    fn backend_fd(&self) -> Option<RawFd> {
        None
    }
}

/// `epoll`-backed implementation.
pub struct EpollBackend {
    epoll_fd: RawFd,
    registered: std::collections::HashSet<RawFd>,
    event_buf: Vec<libc::epoll_event>,
}

const MAX_EVENTS: usize = 64;

impl EpollBackend {
    pub fn new() -> io::Result<Self> {
        // EPOLL_CLOEXEC in one call, matching the source's separate
        // epoll_create + fcntl(FD_CLOEXEC) dance but without the race.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollBackend {
            epoll_fd,
            registered: std::collections::HashSet::new(),
            event_buf: vec![unsafe { std::mem::zeroed() }; MAX_EVENTS],
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, events: EventMask) -> io::Result<()> {
        let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
        ev.events = events.raw();
        ev.u64 = fd as u64;
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Backend for EpollBackend {
    fn set_handler(&mut self, fd: RawFd, events: EventMask) -> io::Result<()> {
        self.registered.insert(fd);
        if !events.is_empty() {
            self.ctl(libc::EPOLL_CTL_ADD, fd, events)?;
        }
        Ok(())
    }

    fn set_events(&mut self, fd: RawFd, events: EventMask) -> io::Result<()> {
        if !self.registered.contains(&fd) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "fd has no epoll handler"));
        }
        if events.is_empty() {
            // Harmless if it was never added (mirrors the source's
            // "EPOLL_CTL_DEL on something not added" tolerance).
            let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, EventMask::NONE);
        } else {
            self.ctl(libc::EPOLL_CTL_MOD, fd, events)
                .or_else(|_| self.ctl(libc::EPOLL_CTL_ADD, fd, events))?;
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        if self.registered.remove(&fd) {
            let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, EventMask::NONE);
        }
        Ok(())
    }

    fn poll(&mut self, timeout_ms: i32, out: &mut Vec<ReadyEvent>) -> io::Result<usize> {
        let count = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.event_buf.as_mut_ptr(),
                self.event_buf.len() as i32,
                timeout_ms,
            )
        };
        if count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for ev in &self.event_buf[..count as usize] {
            out.push(ReadyEvent {
                fd: ev.u64 as RawFd,
                events: EventMask::from_raw(ev.events),
            });
        }
        Ok(count as usize)
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoll_reports_readiness_on_a_pipe() {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut backend = EpollBackend::new().unwrap();
        backend.set_handler(read_fd, EventMask::READ).unwrap();

        let mut out = Vec::new();
        assert_eq!(backend.poll(0, &mut out).unwrap(), 0);

        unsafe {
            libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1);
        }

        out.clear();
        let n = backend.poll(1000, &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].fd, read_fd);
        assert!(out[0].events.contains(EventMask::READ));

        backend.remove(read_fd).unwrap();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
