//! Process-wide tuning knobs.
//!
//! The engine has no internal concurrency (every mutating method on
//! [`crate::Cache`] takes `&mut self`), but configuration is explicitly
//! process-wide: every handle in the process observes the same tuning,
//! stored as atomics so concurrent handles on independent threads never
//! tear a read.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Mirrors the original server's `maxmemory-policy` bitflag surface:
    /// a base selector plus an `ALLKEYS` scope bit and a
    /// `NO_SHARED_INTEGERS` modifier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MaxMemoryPolicy: i32 {
        const LRU               = 1 << 0;
        const LFU                = 1 << 1;
        const RANDOM             = 1 << 2;
        const VOLATILE_TTL       = 1 << 3;
        const NO_EVICTION        = 1 << 4;
        const ALLKEYS            = 1 << 5;
        const NO_SHARED_INTEGERS = 1 << 6;
    }
}

impl Default for MaxMemoryPolicy {
    fn default() -> Self {
        MaxMemoryPolicy::NO_EVICTION
    }
}

impl MaxMemoryPolicy {
    pub fn is_lru(self) -> bool {
        self.contains(MaxMemoryPolicy::LRU)
    }

    pub fn is_lfu(self) -> bool {
        self.contains(MaxMemoryPolicy::LFU)
    }

    pub fn is_volatile_ttl(self) -> bool {
        self.contains(MaxMemoryPolicy::VOLATILE_TTL)
    }

    pub fn is_random(self) -> bool {
        self.contains(MaxMemoryPolicy::RANDOM)
    }

    pub fn is_no_eviction(self) -> bool {
        self.contains(MaxMemoryPolicy::NO_EVICTION)
    }

    /// Whether candidates are drawn from all keys or only keys with a TTL.
    pub fn scope_allkeys(self) -> bool {
        self.contains(MaxMemoryPolicy::ALLKEYS)
    }
}

/// Plain-data mirror of the live, process-wide atomic configuration.
/// `serde`-derivable so an embedding host can load it from whatever
/// config format (file, env, flags) it already uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bytes. Zero means unbounded (the governor never runs).
    pub maxmemory: u64,
    pub maxmemory_policy: MaxMemoryPolicy,
    pub maxmemory_samples: i32,
    /// Minutes per LFU counter decrement.
    pub lfu_decay_time: u64,
    /// Not part of the original's public config surface, but the LFU
    /// logarithmic-increment formula is unusable without it.
    pub lfu_log_factor: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            maxmemory: 0,
            maxmemory_policy: MaxMemoryPolicy::default(),
            maxmemory_samples: 5,
            lfu_decay_time: 1,
            lfu_log_factor: 10,
        }
    }
}

static MAXMEMORY: AtomicU64 = AtomicU64::new(0);
static MAXMEMORY_POLICY: AtomicU64 = AtomicU64::new(MaxMemoryPolicy::NO_EVICTION.bits() as u64);
static MAXMEMORY_SAMPLES: AtomicU64 = AtomicU64::new(5);
static LFU_DECAY_TIME: AtomicU64 = AtomicU64::new(1);
static LFU_LOG_FACTOR: AtomicU64 = AtomicU64::new(10);

/// Install a new process-wide configuration. Every `Cache` handle in the
/// process picks up the new values on its next access.
pub fn set_config(cfg: &Config) {
    MAXMEMORY.store(cfg.maxmemory, Ordering::Release);
    MAXMEMORY_POLICY.store(cfg.maxmemory_policy.bits() as u64, Ordering::Release);
    MAXMEMORY_SAMPLES.store(cfg.maxmemory_samples as u64, Ordering::Release);
    LFU_DECAY_TIME.store(cfg.lfu_decay_time, Ordering::Release);
    LFU_LOG_FACTOR.store(cfg.lfu_log_factor, Ordering::Release);
    tracing::info!(?cfg, "config updated");
}

/// Snapshot the current process-wide configuration.
pub fn get_config() -> Config {
    Config {
        maxmemory: MAXMEMORY.load(Ordering::Acquire),
        maxmemory_policy: MaxMemoryPolicy::from_bits_truncate(
            MAXMEMORY_POLICY.load(Ordering::Acquire) as i32,
        ),
        maxmemory_samples: MAXMEMORY_SAMPLES.load(Ordering::Acquire) as i32,
        lfu_decay_time: LFU_DECAY_TIME.load(Ordering::Acquire),
        lfu_log_factor: LFU_LOG_FACTOR.load(Ordering::Acquire),
    }
}
