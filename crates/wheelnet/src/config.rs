//! The runtime's `os.*` configuration surface, parsed from TOML the same
//! way `rist-bonding-core::config` resolves its own: an all-`Option`
//! `*Input` struct deserializes leniently, then `.resolve()` fills in
//! defaults and applies the clamps spec's configuration table calls out
//! (`os.timers.resolution` 1..1000, `os.tun.write_queue_size` 4..1000,
//! etc).

use serde::Deserialize;

use wheelnet_core::packet_store::PacketStoreConfig;
use wheelnet_timer::WheelConfig;
use wheelnet_tun::TunConfig;

/// Target bytes per slab the packet store tries to stay under, per spec's
/// "slab count chosen to keep each slab within a memory target" note —
/// 256 KB for the regular tier, 64 KB for the small tier.
const REGULAR_SLAB_TARGET_BYTES: usize = 256 * 1024;
const SMALL_SLAB_TARGET_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacketStoreConfigInput {
    pub max_memory: Option<u32>,
    pub max_small_memory: Option<u32>,
    pub min_memory_savings_to_optimize: Option<usize>,
    pub force_packet_optimization: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimersConfigInput {
    pub resolution: Option<u32>,
    pub base_level_bits: Option<u32>,
    pub read_ahead_slots: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TunConfigInput {
    pub max_reads_per_event: Option<u8>,
    pub async_writes: Option<bool>,
    pub write_queue_size: Option<u16>,
    pub tx_queue_length: Option<u32>,
    pub max_memory: Option<u32>,
    pub rate_interval: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfigInput {
    pub packet_store: PacketStoreConfigInput,
    pub timers: TimersConfigInput,
    pub tun: TunConfigInput,
    pub vmem_max: Option<u64>,
    pub numfd_max: Option<u64>,
}

/// Byte threshold below which [`wheelnet_core::packet_store::PacketStore::optimize`]
/// isn't worth calling, plus the "do it anyway" override. Kept outside
/// `PacketStoreConfig` itself since the store has no notion of a
/// threshold — callers decide whether a given `optimize()` is worthwhile.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeConfig {
    pub min_savings_bytes: usize,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub packet_store: PacketStoreConfig,
    pub optimize: OptimizeConfig,
    pub wheel: WheelConfig,
    pub tun: TunConfig,
    /// `setrlimit(RLIMIT_AS)` ceiling in KB, if set.
    pub vmem_max_kb: Option<u64>,
    /// `setrlimit(RLIMIT_NOFILE)` ceiling, if set.
    pub numfd_max: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfigInput::default().resolve()
    }
}

fn slabs_for_budget(budget_bytes: u64, blocks_per_slab: usize, payload_size: usize) -> usize {
    if budget_bytes == 0 || blocks_per_slab == 0 {
        return 0;
    }
    let slab_bytes = (blocks_per_slab * payload_size) as u64;
    ((budget_bytes + slab_bytes - 1) / slab_bytes).max(1) as usize
}

impl PacketStoreConfigInput {
    pub fn resolve(self) -> PacketStoreConfig {
        let defaults = PacketStoreConfig::default();

        let small_payload_size = defaults.small_payload_size;
        let small_blocks_per_slab = (SMALL_SLAB_TARGET_BYTES / small_payload_size).max(1);
        let small_budget_bytes = self.max_small_memory.unwrap_or(1024) as u64 * 1024;
        let small_max_slabs = slabs_for_budget(small_budget_bytes, small_blocks_per_slab, small_payload_size);

        let regular_payload_size = defaults.regular_payload_size;
        let regular_blocks_per_slab = (REGULAR_SLAB_TARGET_BYTES / regular_payload_size).max(1);
        let regular_budget_bytes = self.max_memory.unwrap_or(16) as u64 * 1024 * 1024;
        let regular_max_slabs =
            slabs_for_budget(regular_budget_bytes, regular_blocks_per_slab, regular_payload_size);

        PacketStoreConfig {
            small_payload_size,
            small_blocks_per_slab,
            small_max_slabs,
            regular_payload_size,
            regular_blocks_per_slab,
            regular_max_slabs,
        }
    }

    pub fn resolve_optimize(&self, regular_payload_size: usize) -> OptimizeConfig {
        OptimizeConfig {
            min_savings_bytes: self
                .min_memory_savings_to_optimize
                .unwrap_or(regular_payload_size / 2),
            force: self.force_packet_optimization.unwrap_or(false),
        }
    }
}

impl TimersConfigInput {
    pub fn resolve(self) -> WheelConfig {
        let defaults = WheelConfig::default();
        WheelConfig {
            resolution_ms: self.resolution.unwrap_or(defaults.resolution_ms).clamp(1, 1000),
            base_level_bits: self
                .base_level_bits
                .unwrap_or(defaults.base_level_bits)
                .clamp(8, 30),
            read_ahead_slots: self.read_ahead_slots.unwrap_or(defaults.read_ahead_slots),
            ..defaults
        }
    }
}

impl TunConfigInput {
    pub fn resolve(self) -> TunConfig {
        let defaults = TunConfig::default();
        TunConfig {
            max_reads_per_event: self.max_reads_per_event.unwrap_or(defaults.max_reads_per_event),
            async_writes: self.async_writes.unwrap_or(defaults.async_writes),
            write_queue_size: self
                .write_queue_size
                .unwrap_or(defaults.write_queue_size)
                .clamp(4, 1000),
            tx_queue_length: self.tx_queue_length.or(defaults.tx_queue_length),
            max_memory_mb: self.max_memory.unwrap_or(defaults.max_memory_mb).clamp(1, 1024),
            rate_interval: self.rate_interval.unwrap_or(defaults.rate_interval),
        }
    }
}

impl RuntimeConfigInput {
    pub fn resolve(self) -> RuntimeConfig {
        let optimize = self
            .packet_store
            .resolve_optimize(PacketStoreConfig::default().regular_payload_size);
        RuntimeConfig {
            packet_store: self.packet_store.clone().resolve(),
            optimize,
            wheel: self.timers.resolve(),
            tun: self.tun.resolve(),
            vmem_max_kb: self.vmem_max,
            numfd_max: self.numfd_max,
        }
    }

    pub fn from_toml_str(input: &str) -> Result<RuntimeConfig, String> {
        if input.trim().is_empty() {
            return Ok(RuntimeConfig::default());
        }
        let parsed: RuntimeConfigInput =
            toml::from_str(input).map_err(|e| format!("invalid config TOML: {e}"))?;
        Ok(parsed.resolve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_matches_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.wheel.resolution_ms, 1);
        assert_eq!(cfg.tun.max_reads_per_event, 64);
        assert_eq!(cfg.vmem_max_kb, None);
    }

    #[test]
    fn timers_resolution_is_clamped_to_range() {
        let toml = r#"
            [timers]
            resolution = 5000
        "#;
        let cfg = RuntimeConfigInput::from_toml_str(toml).unwrap();
        assert_eq!(cfg.wheel.resolution_ms, 1000);
    }

    #[test]
    fn tun_write_queue_size_is_clamped() {
        let toml = r#"
            [tun]
            write_queue_size = 1
        "#;
        let cfg = RuntimeConfigInput::from_toml_str(toml).unwrap();
        assert_eq!(cfg.tun.write_queue_size, 4);
    }

    #[test]
    fn packet_store_zero_memory_disables_regular_tier() {
        let toml = r#"
            [packet_store]
            max_memory = 0
        "#;
        let cfg = RuntimeConfigInput::from_toml_str(toml).unwrap();
        assert_eq!(cfg.packet_store.regular_max_slabs, 0);
    }

    #[test]
    fn packet_store_budget_yields_at_least_one_slab_when_nonzero() {
        let toml = r#"
            [packet_store]
            max_memory = 1
        "#;
        let cfg = RuntimeConfigInput::from_toml_str(toml).unwrap();
        assert!(cfg.packet_store.regular_max_slabs >= 1);
    }

    #[test]
    fn vmem_and_numfd_pass_through() {
        let toml = r#"
            vmem_max = 524288
            numfd_max = 4096
        "#;
        let cfg = RuntimeConfigInput::from_toml_str(toml).unwrap();
        assert_eq!(cfg.vmem_max_kb, Some(524288));
        assert_eq!(cfg.numfd_max, Some(4096));
    }
}
