//! Ties the reactor, timer wheel and packet store together behind one
//! [`RuntimeConfig`], mirroring how `original_source`'s `main()` wires
//! `Utils::setup()`, the process-wide `BasicMemPool`s and the
//! `EventManager` singleton before handing control to `implRun()`.

use std::rc::Rc;

use wheelnet_core::handle::BufferHandle;
use wheelnet_core::packet_store::PacketStore;
use wheelnet_reactor::EventLoop;

use crate::config::RuntimeConfig;
use crate::limits;

/// An event loop plus the packet store it and every tunnel registered on
/// it share, built from one resolved [`RuntimeConfig`].
pub struct Runtime {
    pub event_loop: EventLoop,
    pub packet_store: Rc<PacketStore>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Applies `os.vmem_max`/`os.numfd_max`, builds the packet store and
    /// the event loop's timer wheel from `config`.
    pub fn new(config: RuntimeConfig) -> std::io::Result<Self> {
        limits::apply(config.vmem_max_kb, config.numfd_max);

        let packet_store = Rc::new(PacketStore::new(config.packet_store));
        let event_loop = EventLoop::new(config.wheel)?;

        Ok(Runtime {
            event_loop,
            packet_store,
            config,
        })
    }

    pub fn tun_config(&self) -> wheelnet_tun::TunConfig {
        self.config.tun.clone()
    }

    /// Moves `handle` into the small pool tier if doing so would reclaim
    /// at least `os.packet_store.min_memory_savings_to_optimize` bytes (or
    /// unconditionally, under `os.packet_store.force_packet_optimization`).
    pub fn optimize_packet(&self, handle: BufferHandle) -> BufferHandle {
        let savings = handle.get_memory_size().saturating_sub(self.config.packet_store.small_payload_size);
        if !self.config.optimize.force && savings < self.config.optimize.min_savings_bytes {
            return handle;
        }
        self.packet_store.optimize(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_builds_from_default_config() {
        let rt = Runtime::new(RuntimeConfig::default()).unwrap();
        assert_eq!(rt.packet_store.miss_count(), 0);
    }

    #[test]
    fn optimize_packet_skips_small_savings() {
        let rt = Runtime::new(RuntimeConfig::default()).unwrap();
        let handle = rt.packet_store.get_packet(64);
        let before_tag = handle.tag();
        let optimized = rt.optimize_packet(handle);
        assert_eq!(optimized.tag(), before_tag);
    }
}
