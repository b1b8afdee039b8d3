//! The event loop itself.
//!
//! Grounded on `original_source/lib/event/EventManager.hpp`'s state
//! (`_events`, `_loopEndQueue`/`_processedLoopEndQueue`, `_signalHandlers`,
//! `_shutdownHandlers`, `_childHandlers`, `_working`,
//! `_currentEndOfLoopId`) and `EpollEventManager.cpp::implRun`'s iteration
//! order (poll → refresh time → signals → FD dispatch → timers →
//! end-of-loop drain). Handler storage departs from the source's raw
//! observer pointers in one place: `LoopEndHandler`/`SignalHandler`/
//! `ShutdownHandler` subscribers are held as `Weak<RefCell<dyn Trait>>`
//! rather than relying on a destructor to call back into the loop to
//! unsubscribe (Rust has no virtual-destructor equivalent for that); a
//! dead `Weak` is simply skipped when the loop gets to it, which gives
//! the same "the object is gone, stop calling it" outcome without a
//! callback hook. FD handlers and child handlers keep the source's
//! explicit-unregistration model (`remove_handler`, `remove_child_handler`)
//! since those are owned resources (an FD, a PID), not anonymous
//! listeners.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use tracing::{debug, error, info, trace, warn};

use wheelnet_core::time::{CurrentTime, Time};
use wheelnet_timer::{TimerId, TimingWheel, WheelConfig};

use crate::backend::{Backend, EpollBackend, ReadyEvent};
use crate::mask::EventMask;
use crate::queue::TaskQueue;
use crate::signals::{self, ChildStatus, Signal};

pub trait FdHandler {
    fn handle_fd_event(&mut self, fd: RawFd, events: EventMask);
}

pub trait ChildHandler {
    fn handle_child_event(&mut self, pid: libc::pid_t, status: ChildStatus);
}

pub trait LoopEndHandler {
    fn handle_loop_end(&mut self);
}

pub trait SignalHandler {
    fn handle_signal(&mut self, sig: Signal);
}

pub trait ShutdownHandler {
    fn handle_shutdown(&mut self);
}

struct FdSlot {
    handler: Rc<RefCell<dyn FdHandler>>,
    events: EventMask,
}

/// Why `run()` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called, or the loop's own shutdown path finished.
    Requested,
    /// A process-wide INT/TERM was observed (primary loop only notices
    /// this directly; non-primary loops only stop via `stop()`).
    Signal,
}

/// A single-threaded readiness/timer/task event loop.
pub struct EventLoop {
    backend: EpollBackend,
    fds: HashMap<RawFd, FdSlot>,
    loop_end_current: Vec<Weak<RefCell<dyn LoopEndHandler>>>,
    loop_end_next: Vec<Weak<RefCell<dyn LoopEndHandler>>>,
    signal_handlers: Vec<Weak<RefCell<dyn SignalHandler>>>,
    shutdown_handlers: Vec<Weak<RefCell<dyn ShutdownHandler>>>,
    child_handlers: HashMap<libc::pid_t, Rc<RefCell<dyn ChildHandler>>>,
    wheel: TimingWheel,
    clock: CurrentTime,
    current_time: Time,
    last_tick_time: Time,
    working: bool,
    is_primary: bool,
    task_queue: Option<Rc<TaskQueue>>,
}

impl EventLoop {
    /// Creates a new loop. The first one created process-wide becomes
    /// primary and installs signal handlers (spec §4.5).
    pub fn new(wheel_config: WheelConfig) -> std::io::Result<Self> {
        let is_primary = signals::claim_primary();
        if is_primary {
            signals::install()?;
            info!("wheelnet-reactor: primary event loop elected, signal handlers installed");
        } else {
            info!("wheelnet-reactor: secondary event loop created, signals not handled here");
        }

        Ok(EventLoop {
            backend: EpollBackend::new()?,
            fds: HashMap::new(),
            loop_end_current: Vec::new(),
            loop_end_next: Vec::new(),
            signal_handlers: Vec::new(),
            shutdown_handlers: Vec::new(),
            child_handlers: HashMap::new(),
            wheel: TimingWheel::new(wheel_config),
            clock: CurrentTime::new(),
            current_time: Time::zero(),
            last_tick_time: Time::zero(),
            working: false,
            is_primary,
            task_queue: None,
        })
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    fn refresh_time(&mut self) {
        self.current_time = self.clock.now();
    }

    // ---- FD API (spec §4.5 "FD API contract") ----------------------------

    pub fn set_handler(&mut self, fd: RawFd, handler: Rc<RefCell<dyn FdHandler>>, events: EventMask) {
        self.fds.insert(fd, FdSlot { handler, events });
        if !events.is_empty() {
            if let Err(e) = self.backend.set_handler(fd, events) {
                warn!(fd, error = %e, "wheelnet-reactor: backend set_handler failed");
            }
        }
    }

    /// Requires an existing handler for `fd` (spec §4.5).
    pub fn set_events(&mut self, fd: RawFd, events: EventMask) {
        let Some(slot) = self.fds.get_mut(&fd) else {
            warn!(fd, "wheelnet-reactor: set_events on an fd with no handler");
            return;
        };
        slot.events = events;
        if let Err(e) = self.backend.set_events(fd, events) {
            warn!(fd, error = %e, "wheelnet-reactor: backend set_events failed");
        }
    }

    pub fn enable_read(&mut self, fd: RawFd) {
        if let Some(slot) = self.fds.get(&fd) {
            self.set_events(fd, slot.events.with_read(true));
        }
    }

    pub fn disable_read(&mut self, fd: RawFd) {
        if let Some(slot) = self.fds.get(&fd) {
            self.set_events(fd, slot.events.with_read(false));
        }
    }

    pub fn enable_write(&mut self, fd: RawFd) {
        if let Some(slot) = self.fds.get(&fd) {
            self.set_events(fd, slot.events.with_write(true));
        }
    }

    pub fn disable_write(&mut self, fd: RawFd) {
        if let Some(slot) = self.fds.get(&fd) {
            self.set_events(fd, slot.events.with_write(false));
        }
    }

    pub fn remove_handler(&mut self, fd: RawFd) {
        if self.fds.remove(&fd).is_some() {
            let _ = self.backend.remove(fd);
        }
    }

    pub fn close_fd(&mut self, fd: RawFd) -> bool {
        self.remove_handler(fd);
        unsafe { libc::close(fd) == 0 }
    }

    // ---- Timer facade (delegates to wheelnet_timer::TimingWheel) --------

    pub fn schedule_timer(&mut self, delay_ms: u32, callback: Box<dyn FnMut(TimerId)>) -> TimerId {
        self.wheel.schedule(delay_ms, callback)
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.wheel.cancel(id);
    }

    // ---- Subscriptions -----------------------------------------------

    pub fn loop_end_subscribe(&mut self, handler: &Rc<RefCell<dyn LoopEndHandler>>) {
        self.loop_end_next.push(Rc::downgrade(handler));
    }

    pub fn signal_subscribe(&mut self, handler: &Rc<RefCell<dyn SignalHandler>>) {
        self.signal_handlers.push(Rc::downgrade(handler));
    }

    pub fn shutdown_subscribe(&mut self, handler: &Rc<RefCell<dyn ShutdownHandler>>) {
        self.shutdown_handlers.push(Rc::downgrade(handler));
    }

    pub fn set_child_handler(&mut self, pid: libc::pid_t, handler: Rc<RefCell<dyn ChildHandler>>) {
        self.child_handlers.insert(pid, handler);
    }

    pub fn remove_child_handler(&mut self, pid: libc::pid_t) {
        self.child_handlers.remove(&pid);
    }

    /// Wires a cross-thread [`TaskQueue`] into this loop by registering its
    /// doorbell FD. The loop becomes the queue's sole consumer thread.
    pub fn attach_task_queue(&mut self, queue: Rc<TaskQueue>) {
        let fd = queue.wake_fd();
        self.task_queue = Some(queue);
        let self_handler: Rc<RefCell<dyn FdHandler>> = Rc::new(RefCell::new(TaskQueueFdHandler {
            queue: self.task_queue.clone().unwrap(),
        }));
        self.set_handler(fd, self_handler, EventMask::READ);
    }

    // ---- Lifecycle ------------------------------------------------------

    pub fn stop(&mut self) {
        self.working = false;
    }

    /// Runs until `stop()` is called or (primary loop only) INT/TERM is
    /// observed. Mirrors `EpollEventManager::implRun`'s iteration order.
    pub fn run(&mut self) -> StopReason {
        if self.working {
            return StopReason::Requested;
        }
        self.working = true;
        self.refresh_time();
        self.last_tick_time = self.current_time;
        info!(primary = self.is_primary, "wheelnet-reactor: event loop starting");

        let mut ready = Vec::with_capacity(64);
        let reason = loop {
            if !self.working {
                break StopReason::Requested;
            }
            if self.is_primary && signals::stop_requested() {
                break StopReason::Signal;
            }

            let timeout_ms = self.compute_timeout();

            ready.clear();
            if let Err(e) = self.backend.poll(timeout_ms, &mut ready) {
                error!(error = %e, "wheelnet-reactor: backend poll failed");
            }

            self.refresh_time();

            if self.is_primary {
                self.process_signals();
                if signals::stop_requested() {
                    break StopReason::Signal;
                }
            }

            for ev in ready.drain(..) {
                self.dispatch_fd_event(ev);
            }

            self.expire_timers();
            self.drain_loop_end();
        };

        self.working = false;
        info!(?reason, "wheelnet-reactor: event loop stopped");
        reason
    }

    fn compute_timeout(&self) -> i32 {
        if !self.loop_end_next.is_empty() {
            return 0;
        }
        match self.wheel.next_timeout_ms() {
            Some(ms) => ms.min(i32::MAX as u32) as i32,
            None => -1,
        }
    }

    fn dispatch_fd_event(&mut self, ev: ReadyEvent) {
        let Some(slot) = self.fds.get(&ev.fd) else {
            // The handler was removed by an earlier callback this
            // iteration; safe to ignore (source tolerates this too).
            return;
        };
        let mut events = ev.events;
        if events.is_error_or_hangup() {
            events = if slot.events.contains(EventMask::WRITE) && !slot.events.contains(EventMask::READ) {
                EventMask::WRITE
            } else {
                EventMask::READ
            };
            self.set_events(ev.fd, EventMask::NONE);
        }
        let handler = self.fds.get(&ev.fd).map(|s| s.handler.clone());
        if let Some(handler) = handler {
            handler.borrow_mut().handle_fd_event(ev.fd, events);
        }
    }

    fn expire_timers(&mut self) {
        let elapsed = self
            .current_time
            .as_millis()
            .saturating_sub(self.last_tick_time.as_millis())
            .min(u32::MAX as u64) as u32;
        if elapsed > 0 {
            self.wheel.advance_ms(elapsed);
            self.last_tick_time = self.current_time;
        }
    }

    fn process_signals(&mut self) {
        for sig in signals::drain_user_signals() {
            debug!(?sig, "wheelnet-reactor: dispatching signal to subscribers");
            self.signal_handlers.retain(|w| w.upgrade().is_some());
            for w in self.signal_handlers.clone() {
                if let Some(h) = w.upgrade() {
                    h.borrow_mut().handle_signal(sig);
                }
            }
        }

        if signals::take_sigchld_pending() {
            for (pid, status) in signals::reap_children() {
                let remove = !matches!(status, ChildStatus::Stopped(_) | ChildStatus::Continued);
                if let Some(handler) = self.child_handlers.get(&pid).cloned() {
                    handler.borrow_mut().handle_child_event(pid, status);
                }
                if remove {
                    self.child_handlers.remove(&pid);
                }
            }
        }
    }

    fn drain_loop_end(&mut self) {
        std::mem::swap(&mut self.loop_end_current, &mut self.loop_end_next);
        self.loop_end_next.clear();
        for w in self.loop_end_current.drain(..) {
            if let Some(h) = w.upgrade() {
                h.borrow_mut().handle_loop_end();
            }
        }
    }

    /// Forced shutdown: notifies every shutdown subscriber so it can
    /// release resources, then returns. Graceful shutdown is just
    /// `stop()` plus letting `run()` return naturally.
    pub fn shutdown(&mut self, force: bool) -> Result<(), wheelnet_core::error::Code> {
        if self.working && !force {
            return Err(wheelnet_core::error::Code::InvalidParameter);
        }
        for w in self.shutdown_handlers.drain(..) {
            if let Some(h) = w.upgrade() {
                h.borrow_mut().handle_shutdown();
            }
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if self.is_primary {
            signals::release_primary();
        }
    }
}

struct TaskQueueFdHandler {
    queue: Rc<TaskQueue>,
}

impl FdHandler for TaskQueueFdHandler {
    fn handle_fd_event(&mut self, _fd: RawFd, _events: EventMask) {
        let ran = self.queue.dispatch_pending();
        if ran > 0 {
            trace!(ran, "wheelnet-reactor: dispatched cross-thread tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFdHandler {
        count: Rc<AtomicU32>,
    }

    impl FdHandler for CountingFdHandler {
        fn handle_fd_event(&mut self, _fd: RawFd, _events: EventMask) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fd_handler_fires_on_readiness_and_stop_ends_run() {
        let mut fds = [0i32; 2];
        unsafe {
            libc::pipe(fds.as_mut_ptr());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut evloop = EventLoop::new(WheelConfig::default()).unwrap();
        let count = Rc::new(AtomicU32::new(0));
        let handler: Rc<RefCell<dyn FdHandler>> =
            Rc::new(RefCell::new(CountingFdHandler { count: count.clone() }));
        evloop.set_handler(read_fd, handler, EventMask::READ);

        unsafe {
            libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1);
        }

        // Drive one iteration manually instead of calling run() (which
        // blocks forever without a stop trigger in this unit test): poll
        // directly through the same path run() uses.
        let mut ready = Vec::new();
        evloop.backend.poll(100, &mut ready).unwrap();
        for ev in ready {
            evloop.dispatch_fd_event(ev);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        evloop.remove_handler(read_fd);
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn loop_end_subscription_fires_once_and_is_removed() {
        struct Counter(Rc<AtomicU32>);
        impl LoopEndHandler for Counter {
            fn handle_loop_end(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut evloop = EventLoop::new(WheelConfig::default()).unwrap();
        let count = Rc::new(AtomicU32::new(0));
        let handler: Rc<RefCell<dyn LoopEndHandler>> = Rc::new(RefCell::new(Counter(count.clone())));
        evloop.loop_end_subscribe(&handler);

        evloop.drain_loop_end();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        evloop.drain_loop_end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_refuses_while_working_unless_forced() {
        let mut evloop = EventLoop::new(WheelConfig::default()).unwrap();
        evloop.working = true;
        assert!(evloop.shutdown(false).is_err());
        assert!(evloop.shutdown(true).is_ok());
    }
}
