//! The eviction pool (C4): a small best-candidates ladder populated by
//! random sampling, grounded in `db.c`'s `evictionPoolPopulate` callers
//! inside `freeMemoryIfNeeded` (the pool storage itself lives on
//! `redisDb.eviction_pool` in the original; here it's owned by the
//! memory governor that drives it).

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::config::MaxMemoryPolicy;
use crate::keyspace::Keyspace;

/// Matches `EVPOOL_SIZE`.
pub const EVPOOL_SIZE: usize = 16;

#[derive(Debug, Clone)]
struct Slot {
    key: Vec<u8>,
    idle: u64,
}

/// Ordered worst-to-best (highest idle first) candidate ladder.
pub struct EvictionPool {
    slots: Vec<Slot>,
}

impl EvictionPool {
    pub fn new() -> Self {
        EvictionPool {
            slots: Vec::with_capacity(EVPOOL_SIZE),
        }
    }

    /// Sample `count` entries from the keyspace (all keys for `ALLKEYS_*`
    /// policies, TTL-bearing keys only for `VOLATILE_*`) and merge their
    /// idle scores into the pool, evicting the pool's best (lowest-idle)
    /// slot to make room when necessary.
    pub fn populate(&mut self, ks: &Keyspace, policy: MaxMemoryPolicy, count: usize) {
        let clock = ks.clock();
        let samples: Vec<(Vec<u8>, u64)> = if policy.scope_allkeys() {
            sample_iter(ks.raw_iter(), count)
                .into_iter()
                .map(|(k, e)| {
                    let idle = if policy.is_lfu() {
                        e.access.lfu_idle() as u64
                    } else {
                        e.access.lru_idle(clock) as u64
                    };
                    (k.clone(), idle)
                })
                .collect()
        } else {
            let now = now_ms();
            sample_iter(ks.raw_expires_iter(), count)
                .into_iter()
                .map(|(k, &when)| {
                    // VOLATILE_TTL: idle score is "soonest to expire is
                    // most evictable", i.e. idle grows the closer `when`
                    // is to now (or already past).
                    let remaining = when.saturating_sub(now);
                    let idle = u64::MAX - remaining.max(0) as u64;
                    (k.clone(), idle)
                })
                .collect()
        };

        for (key, idle) in samples {
            self.merge(key, idle);
        }
    }

    fn merge(&mut self, key: Vec<u8>, idle: u64) {
        if let Some(existing) = self.slots.iter_mut().find(|s| s.key == key) {
            existing.idle = idle;
            self.resort();
            return;
        }
        if self.slots.len() < EVPOOL_SIZE {
            self.slots.push(Slot { key, idle });
            self.resort();
        } else if idle > self.slots.last().map(|s| s.idle).unwrap_or(0) {
            self.slots.pop();
            self.slots.push(Slot { key, idle });
            self.resort();
        }
    }

    fn resort(&mut self) {
        self.slots.sort_by(|a, b| b.idle.cmp(&a.idle));
    }

    /// Pop the best (highest-idle) live candidate, skipping ghost slots
    /// whose key has since been deleted from `ks`.
    pub fn pop_candidate(&mut self, ks: &Keyspace) -> Option<Vec<u8>> {
        while let Some(slot) = self.slots.first().cloned() {
            self.slots.remove(0);
            if ks.raw_get_entry(&slot.key).is_some() {
                return Some(slot.key);
            }
            // ghost entry: key already gone, keep looking.
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for EvictionPool {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_iter<T: Clone>(
    iter: impl Iterator<Item = T>,
    count: usize,
) -> Vec<T> {
    let mut rng = rand::thread_rng();
    iter.choose_multiple(&mut rng, count)
}

/// Uniform random key selection for the `_RANDOM` policy family, bypassing
/// the idle-score pool entirely.
pub fn sample_random_key(ks: &Keyspace, policy: MaxMemoryPolicy, rng: &mut impl Rng) -> Option<Vec<u8>> {
    if policy.scope_allkeys() {
        ks.raw_iter().map(|(k, _)| k.clone()).choose(rng)
    } else {
        ks.raw_expires_iter().map(|(k, _)| k.clone()).choose(rng)
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn pool_keeps_worst_candidates_under_capacity_pressure() {
        let mut pool = EvictionPool::new();
        for i in 0..(EVPOOL_SIZE * 2) {
            pool.merge(format!("k{i}").into_bytes(), i as u64);
        }
        assert_eq!(pool.slots.len(), EVPOOL_SIZE);
        // the highest-idle keys (largest i) must have survived.
        assert!(pool.slots.iter().all(|s| s.idle >= EVPOOL_SIZE as u64));
    }

    #[test]
    fn pop_candidate_skips_ghost_entries() {
        let mut ks = Keyspace::new();
        ks.add(b"alive".to_vec(), Value::from_bytes(b"v".to_vec()).unwrap());
        let mut pool = EvictionPool::new();
        pool.merge(b"ghost".to_vec(), 100);
        pool.merge(b"alive".to_vec(), 50);
        let picked = pool.pop_candidate(&ks);
        assert_eq!(picked, Some(b"alive".to_vec()));
    }
}
