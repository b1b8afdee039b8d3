//! Readiness event bitmask.
//!
//! Grounded on `original_source/lib/event/EventManager.hpp`'s `EventRead`/
//! `EventWrite` constants, which the epoll backend defines directly as
//! `EPOLLIN`/`EPOLLOUT` (`EpollEventManager.cpp`). We do the same: this
//! type is a thin newtype over the raw epoll bits rather than an
//! abstract platform-independent enum, since only the epoll backend is
//! implemented.

use std::ops::{BitOr, BitOrAssign};

/// A bit sum of readiness conditions, in epoll's own bit space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const READ: EventMask = EventMask(libc::EPOLLIN as u32);
    pub const WRITE: EventMask = EventMask(libc::EPOLLOUT as u32);

    pub fn from_raw(bits: u32) -> Self {
        EventMask(bits)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with_read(self, on: bool) -> EventMask {
        if on { self | EventMask::READ } else { EventMask(self.0 & !EventMask::READ.0) }
    }

    pub fn with_write(self, on: bool) -> EventMask {
        if on { self | EventMask::WRITE } else { EventMask(self.0 & !EventMask::WRITE.0) }
    }

    /// The error/hangup bits epoll reports regardless of what was requested.
    pub fn is_error_or_hangup(self) -> bool {
        self.0 & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_read_and_write_toggle_independently() {
        let m = EventMask::NONE.with_read(true);
        assert!(m.contains(EventMask::READ));
        assert!(!m.contains(EventMask::WRITE));

        let m = m.with_write(true);
        assert!(m.contains(EventMask::READ));
        assert!(m.contains(EventMask::WRITE));

        let m = m.with_read(false);
        assert!(!m.contains(EventMask::READ));
        assert!(m.contains(EventMask::WRITE));
    }

    #[test]
    fn error_or_hangup_detection() {
        let m = EventMask::from_raw(libc::EPOLLHUP as u32);
        assert!(m.is_error_or_hangup());
        assert!(!EventMask::READ.is_error_or_hangup());
    }
}
