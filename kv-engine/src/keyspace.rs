//! The keyspace dictionary (C2): a main key -> value map plus a parallel
//! key -> expiry map, grounded in `db.c`'s `lookupKey`, `dbAdd`,
//! `dbOverwrite`, `setKey`, `dbGenericDelete`, `dbRandomKey`, and the
//! `expireIfNeeded`/`removeExpire`/`setExpire` family.

use ahash::RandomState;
use bitflags::bitflags;
use hashbrown::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use kv_common::{CacheError, CacheResult};

use crate::access::{AccessMeta, Clock};
use crate::config::{get_config, MaxMemoryPolicy};
use crate::stats;
use crate::value::Value;

bitflags! {
    /// Mirrors `LOOKUP_*` from `db.h`. `NoNotify` is omitted: keyspace
    /// notifications are out of scope entirely, not merely unflagged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LookupFlags: u8 {
        /// Don't update the access-meta field on a hit.
        const NO_TOUCH   = 1 << 0;
        /// Don't bump the hits/misses counters.
        const NO_STATS   = 1 << 1;
        /// Reserved for a future write-path hit/miss counter split; not
        /// currently distinguished from the combined counters.
        const WRITE      = 1 << 2;
        /// Report an expired key as absent without deleting it.
        const NO_EXPIRE  = 1 << 3;
    }
}

/// A stored entry: the value plus the access metadata used by the
/// eviction pool. Access metadata lives on the entry rather than on the
/// value object itself, since a shared value (see `value::RefKind`)
/// forbids per-instance access-metadata mutation by definition — giving
/// every *entry* its own metadata sidesteps that rather than forcing
/// interior mutability onto an immutable shared singleton.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub access: AccessMeta,
}

/// Upper bound on `random_key`'s retry loop when it keeps drawing
/// already-expired keys, avoiding the live-lock the spec warns about.
const RANDOM_KEY_MAX_RETRIES: usize = 100;

pub struct Keyspace {
    map: HashMap<Vec<u8>, Entry, RandomState>,
    expires: HashMap<Vec<u8>, i64, RandomState>,
    clock: Clock,
    rng: SmallRng,
    used_bytes: usize,
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            map: HashMap::with_hasher(RandomState::new()),
            expires: HashMap::with_hasher(RandomState::new()),
            clock: Clock::new(),
            rng: SmallRng::from_entropy(),
            used_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    fn now_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn entry_size(key: &[u8], value: &Value) -> usize {
        key.len() + value.approx_size()
    }

    /// `expireIfNeeded`: if `key` carries a TTL that has passed, delete it
    /// and bump the expired-key counter, unless `NO_EXPIRE` is set, in
    /// which case the key is left in place and the counter untouched.
    /// Returns whether the key was (or would have been) expired.
    fn expire_if_needed(&mut self, key: &[u8], flags: LookupFlags) -> bool {
        let Some(&when) = self.expires.get(key) else {
            return false;
        };
        if Self::now_ms() <= when {
            return false;
        }
        if flags.contains(LookupFlags::NO_EXPIRE) {
            return true;
        }
        self.raw_delete(key);
        stats::record_expired(1);
        tracing::debug!(key = %String::from_utf8_lossy(key), "lazily expired key");
        true
    }

    fn raw_delete(&mut self, key: &[u8]) -> Option<Entry> {
        self.expires.remove(key);
        let removed = self.map.remove(key);
        if let Some(ref entry) = removed {
            self.used_bytes -= Self::entry_size(key, &entry.value);
        }
        removed
    }

    /// `lookupKey`: resolve `key`, expiring it first if its TTL has
    /// passed, then touching access metadata and stats per `flags`.
    pub fn lookup(&mut self, key: &[u8], flags: LookupFlags) -> Option<&Value> {
        let expired = self.expire_if_needed(key, flags);
        if expired {
            if !flags.contains(LookupFlags::NO_STATS) && !flags.contains(LookupFlags::WRITE) {
                stats::record_miss();
            }
            return None;
        }
        let cfg = get_config();
        let clock = &self.clock;
        let mut rng = std::mem::replace(&mut self.rng, SmallRng::from_entropy());
        let found = self.map.get_mut(key);
        let result = match found {
            Some(entry) => {
                if !flags.contains(LookupFlags::NO_TOUCH) {
                    entry.access = if cfg.maxmemory_policy.is_lfu() {
                        entry.access.lfu_touch(&cfg, &mut rng)
                    } else {
                        entry.access.touch_lru(clock)
                    };
                }
                if !flags.contains(LookupFlags::NO_STATS) && !flags.contains(LookupFlags::WRITE) {
                    stats::record_hit();
                }
                Some(&entry.value)
            }
            None => {
                if !flags.contains(LookupFlags::NO_STATS) && !flags.contains(LookupFlags::WRITE) {
                    stats::record_miss();
                }
                None
            }
        };
        self.rng = rng;
        result
    }

    /// `dbExists`-style existence check without touching stats/LRU.
    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.lookup(key, LookupFlags::NO_TOUCH | LookupFlags::NO_STATS)
            .is_some()
    }

    /// `dbAdd`: insert a brand-new key. Caller must already know the key
    /// is absent; this does not check.
    pub fn add(&mut self, key: Vec<u8>, value: Value) {
        let access = if get_config().maxmemory_policy.is_lfu() {
            AccessMeta::lfu_new()
        } else {
            AccessMeta::lru_now(&self.clock)
        };
        self.used_bytes += Self::entry_size(&key, &value);
        self.map.insert(key, Entry { value, access });
    }

    /// `dbOverwrite`: replace the value at an existing key, carrying the
    /// old entry's access metadata forward and leaving any TTL untouched.
    pub fn overwrite(&mut self, key: &[u8], value: Value) -> CacheResult<()> {
        let Some(old) = self.map.get_mut(key) else {
            return Err(CacheError::KeyNotExist);
        };
        self.used_bytes -= Self::entry_size(key, &old.value);
        self.used_bytes += Self::entry_size(key, &value);
        old.value = value;
        Ok(())
    }

    /// `setKey`: add-or-overwrite. When `keep_ttl` is false (the
    /// default for a plain `SET`), any existing TTL is cleared.
    pub fn set_key(&mut self, key: &[u8], value: Value, keep_ttl: bool) {
        if self.map.contains_key(key) {
            let _ = self.overwrite(key, value);
        } else {
            self.add(key.to_vec(), value);
        }
        if !keep_ttl {
            self.expires.remove(key);
        }
    }

    /// `dbGenericDelete`.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.raw_delete(key).is_some()
    }

    pub fn flush(&mut self) {
        self.map.clear();
        self.expires.clear();
        self.used_bytes = 0;
    }

    /// `setExpire`: install an absolute millisecond expiry. Requires the
    /// key to already exist in the main map (the expiration map is never
    /// allowed to reference a key the main map doesn't have).
    pub fn set_expire(&mut self, key: &[u8], when_ms: i64) -> CacheResult<()> {
        if !self.map.contains_key(key) {
            return Err(CacheError::KeyNotExist);
        }
        self.expires.insert(key.to_vec(), when_ms);
        Ok(())
    }

    /// `removeExpire`/`persist`.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }

    /// `getExpire`: absolute millisecond expiry, or `None` if the key has
    /// none set. Does not check whether the key itself still exists.
    pub fn get_expire(&self, key: &[u8]) -> Option<i64> {
        self.expires.get(key).copied()
    }

    /// `dbRandomKey`: draw uniformly from the main map, retrying past
    /// entries whose TTL has already passed (and deleting them along the
    /// way), bounded to avoid looping forever over an all-expired table.
    pub fn random_key(&mut self) -> CacheResult<Vec<u8>> {
        if self.map.is_empty() {
            return Err(CacheError::NoKeys);
        }
        for _ in 0..RANDOM_KEY_MAX_RETRIES {
            let idx = self.rng.gen_range(0..self.map.len());
            let Some(key) = self.map.keys().nth(idx).cloned() else {
                continue;
            };
            if self.expire_if_needed(&key, LookupFlags::empty()) {
                continue;
            }
            return Ok(key);
        }
        Err(CacheError::NoKeys)
    }

    pub fn value_type(&mut self, key: &[u8]) -> Option<crate::value::ValueType> {
        self.lookup(key, LookupFlags::NO_TOUCH | LookupFlags::NO_STATS)
            .map(|v| v.value_type())
    }

    /// Raw read-only access for the eviction pool / active-expire sweep,
    /// which must not recursively trigger lazy expiry or touch stats.
    pub(crate) fn raw_iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Entry)> {
        self.map.iter()
    }

    pub(crate) fn raw_expires_iter(&self) -> impl Iterator<Item = (&Vec<u8>, &i64)> {
        self.expires.iter()
    }

    pub(crate) fn raw_get_entry(&self, key: &[u8]) -> Option<&Entry> {
        self.map.get(key)
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn force_delete(&mut self, key: &[u8]) -> bool {
        self.raw_delete(key).is_some()
    }

    /// Apply a lazy-expiry sweep over a single key from the outside
    /// (used by the active-expire pass), returning whether it deleted
    /// anything.
    pub(crate) fn active_expire_one(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key, LookupFlags::empty())
    }

    pub(crate) fn policy(&self) -> MaxMemoryPolicy {
        get_config().maxmemory_policy
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}
