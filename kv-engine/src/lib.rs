//! An in-process, single-threaded key-value cache engine: the keyspace,
//! its access tracking, eviction, and lazy/active expiration, plus a
//! bitmap sub-engine and a thin public façade over all of it.
//!
//! There is no internal concurrency here: every mutating method on
//! [`Cache`] takes `&mut self`, and the embedding host is responsible
//! for serializing calls to any one handle. Configuration and the
//! hit/miss/expired/evicted counters are the only state shared across
//! handles in a process (see [`config`] and [`stats`]).

pub mod access;
pub mod bitops;
pub mod config;
pub mod eviction;
pub mod expire;
pub mod keyspace;
pub mod memory;
pub mod stats;
pub mod value;

use kv_common::{CacheError, CacheResult};

pub use bitops::BitPosRange;
pub use config::{set_config, Config, MaxMemoryPolicy};
pub use keyspace::LookupFlags;
pub use stats::{snapshot as stats_snapshot, Stats};
pub use value::ValueType;

use eviction::EvictionPool;
use keyspace::Keyspace;
use value::Value;

/// The one handle type this crate exposes. Each `Cache` owns its
/// keyspace and eviction pool outright — no internal locking — and two
/// handles in the same process share nothing except the process-wide
/// config and stats.
pub struct Cache {
    keyspace: Keyspace,
    pool: EvictionPool,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            keyspace: Keyspace::new(),
            pool: EvictionPool::new(),
        }
    }

    /// Install a new process-wide configuration, visible to every `Cache`
    /// handle (see [`config`]). Exposed as a method on `Cache` for a
    /// familiar call shape even though the state it writes is shared.
    pub fn set_config(&self, cfg: &Config) {
        config::set_config(cfg);
    }

    // ---- keyspace lifecycle -------------------------------------------------

    pub fn size(&self) -> usize {
        self.keyspace.len()
    }

    pub fn flush(&mut self) {
        self.keyspace.flush();
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.keyspace.contains(key)
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.keyspace.delete(key)
    }

    pub fn random_key(&mut self) -> CacheResult<Vec<u8>> {
        self.keyspace.random_key()
    }

    pub fn key_type(&mut self, key: &[u8]) -> CacheResult<ValueType> {
        self.keyspace
            .value_type(key)
            .ok_or(CacheError::KeyNotExist)
    }

    /// `EXPIRE key seconds`.
    pub fn expire(&mut self, key: &[u8], seconds: i64) -> CacheResult<bool> {
        if !self.keyspace.contains(key) {
            return Ok(false);
        }
        self.expireat(key, now_ms() + seconds * 1000)
    }

    /// `EXPIREAT key unix-ms`. A timestamp already in the past is
    /// accepted and expires the key immediately (bumping the expired
    /// counter), matching the original's lazy-expiry-on-next-lookup
    /// behavior pulled forward to the call site.
    pub fn expireat(&mut self, key: &[u8], when_ms: i64) -> CacheResult<bool> {
        self.keyspace.set_expire(key, when_ms)?;
        // Force the lazy-expiry check immediately so an already-past
        // timestamp takes effect without waiting for the next lookup.
        self.keyspace.lookup(key, LookupFlags::empty());
        Ok(true)
    }

    /// `TTL key`: seconds remaining, -1 if no TTL, -2 if absent.
    pub fn ttl(&mut self, key: &[u8]) -> i64 {
        if !self.keyspace.contains(key) {
            return -2;
        }
        match self.keyspace.get_expire(key) {
            None => -1,
            Some(when) => ((when - now_ms()).max(0) + 999) / 1000,
        }
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.keyspace.persist(key)
    }

    // ---- strings --------------------------------------------------------

    /// `SET key value [NX|XX] [EX seconds|PX ms]`.
    pub fn set(&mut self, key: &[u8], val: Vec<u8>, opts: SetOptions) -> CacheResult<bool> {
        let exists = self.keyspace.contains(key);
        if opts.nx && exists {
            return Ok(false);
        }
        if opts.xx && !exists {
            return Ok(false);
        }
        let value = Value::from_bytes(val)?;
        self.keyspace.set_key(key, value, false);
        if let Some(ms) = opts.expire_ms {
            if ms <= 0 {
                return Err(CacheError::InvalidArg("expire must be positive".into()));
            }
            self.keyspace.set_expire(key, now_ms() + ms)?;
        }
        Ok(true)
    }

    pub fn get(&mut self, key: &[u8]) -> CacheResult<Vec<u8>> {
        let value = self
            .keyspace
            .lookup(key, LookupFlags::empty())
            .ok_or(CacheError::KeyNotExist)?;
        Ok(value.as_string()?.as_bytes())
    }

    pub fn strlen(&mut self, key: &[u8]) -> CacheResult<usize> {
        let value = self
            .keyspace
            .lookup(key, LookupFlags::empty())
            .ok_or(CacheError::KeyNotExist)?;
        Ok(value.as_string()?.len())
    }

    fn incr_by(&mut self, key: &[u8], incr: i64) -> CacheResult<i64> {
        let current = match self.keyspace.lookup(key, LookupFlags::WRITE) {
            Some(v) => v.as_string()?.as_i64()?,
            None => 0,
        };
        let value = current
            .checked_add(incr)
            .ok_or(CacheError::Overflow)?;
        let new_value = Value::from_integer(value, &config::get_config());
        self.keyspace.set_key(key, new_value, true);
        Ok(value)
    }

    pub fn incr(&mut self, key: &[u8]) -> CacheResult<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr(&mut self, key: &[u8]) -> CacheResult<i64> {
        self.incr_by(key, -1)
    }

    pub fn incrby(&mut self, key: &[u8], incr: i64) -> CacheResult<i64> {
        self.incr_by(key, incr)
    }

    pub fn decrby(&mut self, key: &[u8], decr: i64) -> CacheResult<i64> {
        let neg = decr.checked_neg().ok_or(CacheError::Overflow)?;
        self.incr_by(key, neg)
    }

    pub fn incrbyfloat(&mut self, key: &[u8], incr: f64) -> CacheResult<f64> {
        let current = match self.keyspace.lookup(key, LookupFlags::WRITE) {
            Some(v) => v.as_string()?.as_f64()?,
            None => 0.0,
        };
        let value = current + incr;
        if value.is_nan() || value.is_infinite() {
            return Err(CacheError::Overflow);
        }
        let text = format_long_double(value);
        self.keyspace.set_key(key, Value::from_bytes(text)?, true);
        Ok(value)
    }

    pub fn append(&mut self, key: &[u8], suffix: &[u8]) -> CacheResult<usize> {
        match self.keyspace.lookup(key, LookupFlags::WRITE) {
            Some(v) => {
                let mut bytes = value::unshare_string(v.clone())?;
                if bytes.len() + suffix.len() > kv_common::MAX_STRING_LEN {
                    return Err(CacheError::Overflow);
                }
                bytes.extend_from_slice(suffix);
                let len = bytes.len();
                self.keyspace.overwrite(key, Value::from_bytes(bytes)?)?;
                Ok(len)
            }
            None => {
                let len = suffix.len();
                self.keyspace.add(key.to_vec(), Value::from_bytes(suffix.to_vec())?);
                Ok(len)
            }
        }
    }

    pub fn getrange(&mut self, key: &[u8], start: i64, end: i64) -> CacheResult<Vec<u8>> {
        let value = self
            .keyspace
            .lookup(key, LookupFlags::empty())
            .ok_or(CacheError::KeyNotExist)?;
        let bytes = value.as_string()?.as_bytes();
        let strlen = bytes.len() as i64;

        if start < 0 && end < 0 && start > end {
            return Ok(Vec::new());
        }
        let mut start = if start < 0 { strlen + start } else { start };
        let mut end = if end < 0 { strlen + end } else { end };
        if start < 0 {
            start = 0;
        }
        if end < 0 {
            end = 0;
        }
        if end >= strlen {
            end = strlen - 1;
        }
        if start > end || strlen == 0 {
            return Ok(Vec::new());
        }
        Ok(bytes[start as usize..=end as usize].to_vec())
    }

    pub fn setrange(&mut self, key: &[u8], offset: i64, value: &[u8]) -> CacheResult<usize> {
        if offset < 0 {
            return Err(CacheError::InvalidArg("offset must be non-negative".into()));
        }
        let existing = self.keyspace.lookup(key, LookupFlags::WRITE);
        let mut bytes = match existing {
            Some(v) => {
                if value.is_empty() {
                    return Ok(v.as_string()?.len());
                }
                value::unshare_string(v.clone())?
            }
            None => {
                if value.is_empty() {
                    return Ok(0);
                }
                Vec::new()
            }
        };
        let needed = offset as usize + value.len();
        if needed > kv_common::MAX_STRING_LEN {
            return Err(CacheError::Overflow);
        }
        if bytes.len() < needed {
            bytes.resize(needed, 0);
        }
        bytes[offset as usize..offset as usize + value.len()].copy_from_slice(value);
        let len = bytes.len();
        let new_value = Value::from_bytes(bytes)?;
        if self.keyspace.contains(key) {
            self.keyspace.overwrite(key, new_value)?;
        } else {
            self.keyspace.add(key.to_vec(), new_value);
        }
        Ok(len)
    }

    // ---- bitmaps ----------------------------------------------------------

    pub fn setbit(&mut self, key: &[u8], offset: u64, on: u8) -> CacheResult<u8> {
        bitops::set_bit(&mut self.keyspace, key, offset, on)
    }

    pub fn getbit(&mut self, key: &[u8], offset: u64) -> CacheResult<u8> {
        bitops::get_bit(&mut self.keyspace, key, offset)
    }

    pub fn bitcount(&mut self, key: &[u8], range: Option<(i64, i64, bool)>) -> CacheResult<u64> {
        bitops::bit_count(&mut self.keyspace, key, range)
    }

    pub fn bitpos(
        &mut self,
        key: &[u8],
        bit: u8,
        range: BitPosRange,
        isbit: bool,
    ) -> CacheResult<i64> {
        bitops::bit_pos(&mut self.keyspace, key, bit, range, isbit)
    }

    // ---- memory governance / expiry ---------------------------------------

    /// Host-driven: free memory down to `maxmemory` if over budget.
    pub fn free_memory_if_needed(&mut self) -> CacheResult<usize> {
        memory::free_memory_if_needed(&mut self.keyspace, &mut self.pool)
    }

    /// Host-driven: one bounded active-expire sweep.
    pub fn active_expire_cycle(&mut self) -> usize {
        expire::active_expire_cycle(&mut self.keyspace)
    }

    pub fn used_bytes(&self) -> usize {
        self.keyspace.used_bytes()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for [`Cache::set`], mirroring `OBJ_SET_NX`/`OBJ_SET_XX`/
/// `OBJ_SET_EX`/`OBJ_SET_PX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub nx: bool,
    pub xx: bool,
    /// Absolute milliseconds-from-now expiry to install, if any.
    pub expire_ms: Option<i64>,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Render a float the way `createStringObjectFromLongDouble` would for
/// `INCRBYFLOAT`'s reply: shortest round-trippable decimal form, no
/// trailing zeros, integral values with no fractional part.
fn format_long_double(v: f64) -> Vec<u8> {
    if v.fract() == 0.0 && v.abs() < 1e17 {
        format!("{}", v as i64).into_bytes()
    } else {
        let mut s = format!("{v:.17}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut cache = Cache::new();
        cache.set(b"k", b"v".to_vec(), SetOptions::default()).unwrap();
        assert_eq!(cache.get(b"k").unwrap(), b"v".to_vec());
    }

    #[test]
    fn set_with_ex_sets_ttl_within_one_second() {
        let mut cache = Cache::new();
        cache
            .set(
                b"k",
                b"v".to_vec(),
                SetOptions {
                    expire_ms: Some(10_000),
                    ..Default::default()
                },
            )
            .unwrap();
        let ttl = cache.ttl(b"k");
        assert!((9..=10).contains(&ttl), "ttl was {ttl}");
    }

    #[test]
    fn set_with_no_expire_has_ttl_minus_one() {
        let mut cache = Cache::new();
        cache.set(b"k", b"v".to_vec(), SetOptions::default()).unwrap();
        assert_eq!(cache.ttl(b"k"), -1);
    }

    #[test]
    fn ttl_on_absent_key_is_minus_two() {
        let mut cache = Cache::new();
        assert_eq!(cache.ttl(b"missing"), -2);
    }

    #[test]
    fn nx_refuses_when_key_exists() {
        let mut cache = Cache::new();
        cache.set(b"k", b"1".to_vec(), SetOptions::default()).unwrap();
        let applied = cache
            .set(b"k", b"2".to_vec(), SetOptions { nx: true, ..Default::default() })
            .unwrap();
        assert!(!applied);
        assert_eq!(cache.get(b"k").unwrap(), b"1".to_vec());
    }

    #[test]
    fn incrby_is_additive() {
        let mut cache = Cache::new();
        cache.set(b"k", b"10".to_vec(), SetOptions::default()).unwrap();
        cache.incrby(b"k", 5).unwrap();
        cache.incrby(b"k", 7).unwrap();
        assert_eq!(cache.get(b"k").unwrap(), b"22".to_vec());
    }

    #[test]
    fn incrby_overflow_boundary() {
        let mut cache = Cache::new();
        cache
            .set(b"k", b"9223372036854775806".to_vec(), SetOptions::default())
            .unwrap();
        assert_eq!(cache.incrby(b"k", 1).unwrap(), i64::MAX);
        assert_eq!(cache.incrby(b"k", 1).unwrap_err(), CacheError::Overflow);
    }

    #[test]
    fn append_grows_string_and_reports_new_length() {
        let mut cache = Cache::new();
        cache.set(b"k", b"Hello ".to_vec(), SetOptions::default()).unwrap();
        let len = cache.append(b"k", b"World").unwrap();
        assert_eq!(len, 11);
        assert_eq!(cache.get(b"k").unwrap(), b"Hello World".to_vec());
    }

    #[test]
    fn append_over_limit_overflows() {
        let mut cache = Cache::new();
        cache
            .set(b"k", vec![0u8; kv_common::MAX_STRING_LEN - 1], SetOptions::default())
            .unwrap();
        let err = cache.append(b"k", b"xx").unwrap_err();
        assert_eq!(err, CacheError::Overflow);
    }

    #[test]
    fn getrange_matches_negative_index_semantics() {
        let mut cache = Cache::new();
        cache.set(b"k", b"This is a string".to_vec(), SetOptions::default()).unwrap();
        assert_eq!(cache.getrange(b"k", 0, 3).unwrap(), b"This".to_vec());
        assert_eq!(cache.getrange(b"k", -3, -1).unwrap(), b"ing".to_vec());
        assert_eq!(cache.getrange(b"k", 0, -1).unwrap(), b"This is a string".to_vec());
    }

    #[test]
    fn setrange_pads_with_zero_bytes() {
        let mut cache = Cache::new();
        let len = cache.setrange(b"k", 5, b"hello").unwrap();
        assert_eq!(len, 10);
        assert_eq!(cache.get(b"k").unwrap(), vec![0, 0, 0, 0, 0, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn expireat_in_the_past_takes_effect_immediately() {
        let mut cache = Cache::new();
        cache.set(b"k", b"v".to_vec(), SetOptions::default()).unwrap();
        let before = stats::snapshot().expired;
        cache.expireat(b"k", now_ms() - 1).unwrap();
        assert_eq!(cache.get(b"k").unwrap_err(), CacheError::KeyNotExist);
        assert_eq!(stats::snapshot().expired, before + 1);
    }

    #[test]
    fn persist_removes_ttl() {
        let mut cache = Cache::new();
        cache
            .set(
                b"k",
                b"v".to_vec(),
                SetOptions {
                    expire_ms: Some(100_000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cache.persist(b"k"));
        assert_eq!(cache.ttl(b"k"), -1);
        assert!(!cache.persist(b"k"), "second persist is a no-op");
    }

    #[test]
    fn key_type_reports_string() {
        let mut cache = Cache::new();
        cache.set(b"k", b"v".to_vec(), SetOptions::default()).unwrap();
        assert_eq!(cache.key_type(b"k").unwrap(), ValueType::String);
    }
}
