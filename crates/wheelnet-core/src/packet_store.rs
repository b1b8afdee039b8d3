//! Two-tier packet memory store: a small-packet pool for control traffic
//! and ACKs, a regular pool sized to a full MTU payload, and a heap
//! fallback for anything larger than either (counted as a miss).
//!
//! Grounded on `original_source/lib/basic/BasicMemPool.hpp`'s pattern of
//! multiple fixed-size pools behind one facade, sized by the caller's hint
//! rather than by inspecting the data itself.

use std::cell::Cell;

use crate::handle::BufferHandle;
use crate::pool::{Pool, PoolConfig, PoolStats};

/// Sizing for both tiers of a [`PacketStore`].
#[derive(Debug, Clone, Copy)]
pub struct PacketStoreConfig {
    pub small_payload_size: usize,
    pub small_blocks_per_slab: usize,
    pub small_max_slabs: usize,
    pub regular_payload_size: usize,
    pub regular_blocks_per_slab: usize,
    pub regular_max_slabs: usize,
}

impl Default for PacketStoreConfig {
    fn default() -> Self {
        PacketStoreConfig {
            small_payload_size: 256,
            small_blocks_per_slab: 256,
            small_max_slabs: 16,
            regular_payload_size: 2048,
            regular_blocks_per_slab: 128,
            regular_max_slabs: 64,
        }
    }
}

/// Process-wide (or per-loop) packet buffer source, backed by two pools.
pub struct PacketStore {
    small: Pool,
    regular: Pool,
    misses: Cell<u64>,
}

impl PacketStore {
    pub fn new(config: PacketStoreConfig) -> Self {
        PacketStore {
            small: Pool::new(PoolConfig {
                payload_size: config.small_payload_size,
                blocks_per_slab: config.small_blocks_per_slab,
                max_slabs: config.small_max_slabs,
                mem_tag: 1,
            }),
            regular: Pool::new(PoolConfig {
                payload_size: config.regular_payload_size,
                blocks_per_slab: config.regular_blocks_per_slab,
                max_slabs: config.regular_max_slabs,
                mem_tag: 2,
            }),
            misses: Cell::new(0),
        }
    }

    /// Returns a handle of exactly `hint_size` bytes, drawn from the
    /// smallest tier that fits. Falls back to a one-off heap allocation
    /// (counted in [`Self::miss_count`]) if both pools are exhausted or
    /// `hint_size` exceeds the regular tier's payload size.
    pub fn get_packet(&self, hint_size: usize) -> BufferHandle {
        if hint_size <= self.small.payload_size() {
            let h = self.small.acquire(false);
            if !h.is_empty() {
                return h.sub_handle(0, hint_size);
            }
        }
        if hint_size <= self.regular.payload_size() {
            let h = self.regular.acquire(false);
            if !h.is_empty() {
                return h.sub_handle(0, hint_size);
            }
        }
        self.misses.set(self.misses.get() + 1);
        BufferHandle::from_heap(hint_size)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.get()
    }

    /// Moves a handle's bytes into a small-pool block when its length now
    /// fits the small tier but its backing memory is the larger regular
    /// tier (e.g. after trimming headers off a received packet), freeing
    /// the regular-tier slot for a full-size packet. A no-op otherwise,
    /// including if the small pool itself is exhausted.
    pub fn optimize(&self, handle: BufferHandle) -> BufferHandle {
        let fits_small = handle.len() <= self.small.payload_size();
        let already_small = handle.get_memory_size() <= self.small.payload_size();
        if !fits_small || already_small {
            return handle;
        }
        let mut moved = self.small.acquire(false);
        if moved.is_empty() {
            return handle;
        }
        if handle.len() > 0 {
            moved.as_mut_slice().unwrap()[..handle.len()].copy_from_slice(handle.as_slice());
        }
        moved.sub_handle(0, handle.len())
    }

    pub fn small_stats(&self) -> PoolStats {
        self.small.stats()
    }

    pub fn regular_stats(&self) -> PoolStats {
        self.regular.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PacketStoreConfig {
        PacketStoreConfig {
            small_payload_size: 32,
            small_blocks_per_slab: 4,
            small_max_slabs: 1,
            regular_payload_size: 128,
            regular_blocks_per_slab: 4,
            regular_max_slabs: 1,
        }
    }

    #[test]
    fn small_hint_draws_from_small_pool() {
        let store = PacketStore::new(cfg());
        let h = store.get_packet(10);
        assert_eq!(h.len(), 10);
        assert_eq!(store.small_stats().in_use, 1);
        assert_eq!(store.regular_stats().in_use, 0);
    }

    #[test]
    fn large_hint_draws_from_regular_pool() {
        let store = PacketStore::new(cfg());
        let h = store.get_packet(100);
        assert_eq!(h.len(), 100);
        assert_eq!(store.regular_stats().in_use, 1);
    }

    #[test]
    fn oversized_hint_is_a_miss() {
        let store = PacketStore::new(cfg());
        let h = store.get_packet(10_000);
        assert_eq!(h.len(), 10_000);
        assert_eq!(store.miss_count(), 1);
    }

    #[test]
    fn exhaustion_falls_through_to_heap_and_counts_a_miss() {
        let store = PacketStore::new(cfg());
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(store.get_packet(10));
        }
        let overflow = store.get_packet(10);
        assert_eq!(store.miss_count(), 1);
        assert_eq!(overflow.len(), 10);
    }

    #[test]
    fn optimize_moves_trimmed_packet_into_small_pool() {
        let store = PacketStore::new(cfg());
        let mut h = store.get_packet(100); // regular tier
        h.as_mut_slice().unwrap()[..4].copy_from_slice(b"data");
        let trimmed = h.sub_handle(0, 4);
        assert_eq!(store.regular_stats().in_use, 1);

        let moved = store.optimize(trimmed);
        assert_eq!(moved.as_slice(), b"data");
        assert!(moved.get_memory_size() <= 32);
        assert_eq!(store.small_stats().in_use, 1);
    }
}
