//! Cross-module eviction-policy scenarios driven through the [`Cache`]
//! façade, exercising the memory governor, eviction pool, and keyspace
//! together rather than any one module in isolation.

use kv_engine::{stats_snapshot, Cache, Config, MaxMemoryPolicy, SetOptions};

fn value(size: usize) -> Vec<u8> {
    vec![b'x'; size]
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Policy `allkeys-lru`: write 100 keys, touch the first 50 by reading
/// them once, then write one more key that forces a single eviction. The
/// evicted key must come from the untouched latter half with high
/// probability. A 1.1s sleep between seeding and touching pushes the two
/// halves into different seconds of the (1-second-resolution) LRU clock,
/// so the idle-score gap is real rather than a coin flip on timing noise.
#[test]
fn allkeys_lru_evicts_from_untouched_half_with_high_probability() {
    const VALUE_SIZE: usize = 64;
    const TRIALS: usize = 5;
    let mut successes = 0;

    for trial in 0..TRIALS {
        kv_engine::set_config(&Config::default());
        let mut cache = Cache::new();
        for i in 0..100 {
            cache
                .set(format!("t{trial}k{i}").as_bytes(), value(VALUE_SIZE), SetOptions::default())
                .unwrap();
        }

        std::thread::sleep(std::time::Duration::from_millis(1100));

        for i in 0..50 {
            cache.get(format!("t{trial}k{i}").as_bytes()).unwrap();
        }

        let budget = cache.used_bytes() as u64;
        kv_engine::set_config(&Config {
            maxmemory: budget,
            maxmemory_policy: MaxMemoryPolicy::LRU | MaxMemoryPolicy::ALLKEYS,
            maxmemory_samples: 30,
            ..Config::default()
        });

        let evicted_before = stats_snapshot().evicted;
        cache
            .set(format!("t{trial}k100").as_bytes(), value(VALUE_SIZE), SetOptions::default())
            .unwrap();
        cache.free_memory_if_needed().unwrap();
        let evicted_after = stats_snapshot().evicted;
        assert!(evicted_after > evicted_before, "trial {trial}: no eviction occurred");

        let evicted_from_untouched = (50..100)
            .any(|i| !cache.exists(format!("t{trial}k{i}").as_bytes()));
        if evicted_from_untouched {
            successes += 1;
        }
    }

    kv_engine::set_config(&Config::default());
    let rate = successes as f64 / TRIALS as f64;
    assert!(
        rate > 0.9,
        "only {successes}/{TRIALS} evictions came from the untouched half"
    );
}

/// Policy `volatile-ttl`: keys with TTLs {10s, 20s, 30s} plus one key with
/// no TTL at all, over budget. The governor must evict the 10s key first
/// (soonest-to-expire is most evictable), and the no-ttl key is
/// structurally ineligible — it never appears in the expires map the
/// eviction pool samples from under this policy, so it can never be
/// chosen no matter how sampling falls.
#[test]
fn volatile_ttl_evicts_soonest_expiry_first_and_spares_the_no_ttl_key() {
    const VALUE_SIZE: usize = 64;
    kv_engine::set_config(&Config::default());
    let mut cache = Cache::new();
    let now = now_ms();

    cache.set(b"ttl10", value(VALUE_SIZE), SetOptions::default()).unwrap();
    cache.expireat(b"ttl10", now + 10_000).unwrap();
    cache.set(b"ttl20", value(VALUE_SIZE), SetOptions::default()).unwrap();
    cache.expireat(b"ttl20", now + 20_000).unwrap();
    cache.set(b"ttl30", value(VALUE_SIZE), SetOptions::default()).unwrap();
    cache.expireat(b"ttl30", now + 30_000).unwrap();
    cache.set(b"noexp", value(VALUE_SIZE), SetOptions::default()).unwrap();

    let budget = cache.used_bytes() as u64;
    kv_engine::set_config(&Config {
        maxmemory: budget - 1,
        maxmemory_policy: MaxMemoryPolicy::VOLATILE_TTL,
        maxmemory_samples: 30,
        ..Config::default()
    });

    cache.free_memory_if_needed().unwrap();

    assert!(!cache.exists(b"ttl10"), "the soonest-to-expire key must be evicted first");
    assert!(cache.exists(b"ttl20"));
    assert!(cache.exists(b"ttl30"));
    assert!(cache.exists(b"noexp"), "a key with no TTL must never be evicted under volatile-ttl");

    kv_engine::set_config(&Config::default());
}
