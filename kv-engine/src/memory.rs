//! The memory governor (C6), grounded in `db.c`'s `freeMemoryIfNeeded`:
//! drives the eviction pool (or uniform random sampling for the
//! `_RANDOM` policies) until tracked usage falls under `maxmemory`.

use kv_common::{CacheError, CacheResult};

use crate::config::{get_config, MaxMemoryPolicy};
use crate::eviction::{sample_random_key, EvictionPool, EVPOOL_SIZE};
use crate::keyspace::Keyspace;
use crate::stats;

/// Drive eviction until `ks.used_bytes()` is at or under the configured
/// `maxmemory` (a no-op when `maxmemory == 0`). Returns the number of
/// keys evicted.
///
/// Bounds total eviction attempts to `8 * maxmemory_samples * EVPOOL_SIZE`
/// in addition to the "until freed" stop condition, so a pathological
/// case where deletes free less than tracked (there is no fragmentation
/// in this tracked-byte model, so this mostly guards against an empty
/// keyspace) cannot loop forever.
pub fn free_memory_if_needed(ks: &mut Keyspace, pool: &mut EvictionPool) -> CacheResult<usize> {
    let cfg = get_config();
    if cfg.maxmemory == 0 || ks.used_bytes() as u64 <= cfg.maxmemory {
        return Ok(0);
    }
    if cfg.maxmemory_policy.is_no_eviction() {
        return Err(CacheError::MemoryFull);
    }

    let max_attempts = 8 * cfg.maxmemory_samples.max(1) as usize * EVPOOL_SIZE;
    let mut evicted = 0usize;
    let mut attempts = 0usize;

    while ks.used_bytes() as u64 > cfg.maxmemory {
        if attempts >= max_attempts {
            break;
        }
        attempts += 1;

        let victim = if cfg.maxmemory_policy.is_random() {
            let mut rng = rand::thread_rng();
            sample_random_key(ks, cfg.maxmemory_policy, &mut rng)
        } else {
            if pool.is_empty() {
                pool.populate(ks, cfg.maxmemory_policy, cfg.maxmemory_samples.max(1) as usize);
            }
            pool.pop_candidate(ks).or_else(|| {
                pool.populate(ks, cfg.maxmemory_policy, cfg.maxmemory_samples.max(1) as usize);
                pool.pop_candidate(ks)
            })
        };

        let Some(key) = victim else {
            break;
        };
        if ks.force_delete(&key) {
            evicted += 1;
            tracing::info!(key = %String::from_utf8_lossy(&key), "evicted key");
        }
    }

    stats::record_evicted(evicted as u64);

    if ks.used_bytes() as u64 > cfg.maxmemory && evicted == 0 {
        return Err(CacheError::MemoryFull);
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{set_config, Config};
    use crate::value::Value;

    fn big_value() -> Value {
        Value::from_bytes(vec![0u8; 64]).unwrap()
    }

    #[test]
    fn no_eviction_policy_errors_immediately_when_over_budget() {
        let mut ks = Keyspace::new();
        ks.add(b"k".to_vec(), big_value());
        set_config(&Config {
            maxmemory: 1,
            maxmemory_policy: MaxMemoryPolicy::NO_EVICTION,
            ..Config::default()
        });
        let mut pool = EvictionPool::new();
        let err = free_memory_if_needed(&mut ks, &mut pool).unwrap_err();
        assert_eq!(err, CacheError::MemoryFull);
        set_config(&Config::default());
    }

    #[test]
    fn allkeys_random_evicts_until_under_budget() {
        let mut ks = Keyspace::new();
        for i in 0..20 {
            ks.add(format!("k{i}").into_bytes(), big_value());
        }
        set_config(&Config {
            maxmemory: 200,
            maxmemory_policy: MaxMemoryPolicy::RANDOM | MaxMemoryPolicy::ALLKEYS,
            ..Config::default()
        });
        let mut pool = EvictionPool::new();
        let evicted = free_memory_if_needed(&mut ks, &mut pool).unwrap();
        assert!(evicted > 0);
        assert!(ks.used_bytes() as u64 <= 200);
        set_config(&Config::default());
    }

    #[test]
    fn under_budget_is_a_noop() {
        let mut ks = Keyspace::new();
        ks.add(b"k".to_vec(), big_value());
        set_config(&Config::default()); // maxmemory == 0
        let mut pool = EvictionPool::new();
        assert_eq!(free_memory_if_needed(&mut ks, &mut pool).unwrap(), 0);
    }
}
