//! The polymorphic value object: a tagged union over the six stored
//! types, each with its own small set of encodings.
//!
//! Ordinary (refcount == 1) ownership is just a Rust move — the
//! compiler-generated `Drop` is the destructor the original frees by
//! hand in `freeStringObject`/`freeListObject`/etc. The one place the
//! source's three-way refcount sentinel earns its keep in this crate is
//! the shared small-integer pool, represented here by [`RefKind::Shared`]
//! wrapping an `Arc`; the `Static` sentinel ("stack-borrowed, must be
//! promoted before persisting") has no representation at all because
//! Rust's borrow checker already forbids persisting a borrow past its
//! lifetime — "promotion" is simply `.to_vec()` at the one call site
//! that needs it (`Keyspace::set_key` taking a borrowed key).

use std::collections::BTreeMap;
use std::sync::Arc;

use kv_common::{CacheError, CacheResult, EMBSTR_SIZE_LIMIT, MAX_STRING_LEN};

use crate::config::{Config, MaxMemoryPolicy};

/// How many small non-negative integers are eligible for the shared pool,
/// mirroring the original's `OBJ_SHARED_INTEGERS`.
pub const SHARED_INTEGERS: i64 = 10_000;

/// The type tag exposed to callers via the `type` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Stream,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::SortedSet => "zset",
            ValueType::Hash => "hash",
            ValueType::Stream => "stream",
        }
    }
}

/// Marks whether a value object is privately owned, drawn from the
/// shared-integer pool, or (never constructed by this crate, kept only
/// so the discriminated union named in the design notes is complete)
/// stack-borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Owned,
    Shared,
}

/// String-typed payload plus its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringData {
    /// Stored as a plain byte buffer, encoding tag computed from length.
    Bytes(Vec<u8>),
    /// Parsed as a 64-bit integer; no allocation at all.
    Integer(i64),
}

impl StringData {
    pub fn encoding_name(&self) -> &'static str {
        match self {
            StringData::Integer(_) => "int",
            StringData::Bytes(b) if b.len() <= EMBSTR_SIZE_LIMIT => "embstr",
            StringData::Bytes(_) => "raw",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StringData::Integer(n) => n.to_string().len(),
            StringData::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StringData::Bytes(b) if b.is_empty())
    }

    /// Materialise the decimal textual form on the heap, the Rust analogue
    /// of `ll2string`'s stack buffer in `getDecodedObject`/`RcGetRange`.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            StringData::Integer(n) => n.to_string().into_bytes(),
            StringData::Bytes(b) => b.clone(),
        }
    }

    /// Parse this string as a 64-bit integer, the way `getLongLongFromObject`
    /// does for an already-decoded string.
    pub fn as_i64(&self) -> CacheResult<i64> {
        match self {
            StringData::Integer(n) => Ok(*n),
            StringData::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(CacheError::InvalidType {
                    expected: "integer string",
                    actual: "string",
                }),
        }
    }

    /// Parse this string as a long double (`f64` is the Rust-native
    /// equivalent precision used here), the way `getLongDoubleFromObject`
    /// does for `INCRBYFLOAT`.
    pub fn as_f64(&self) -> CacheResult<f64> {
        match self {
            StringData::Integer(n) => Ok(*n as f64),
            StringData::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .ok_or(CacheError::InvalidType {
                    expected: "float string",
                    actual: "string",
                }),
        }
    }
}

/// Minimal generic payloads for the non-string aggregate types. Command
/// surfaces for these (LPUSH, SADD, ZADD, HSET, XADD, ...) are out of
/// scope; these payloads exist so the value model can create, type-check,
/// and delete one of each type uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum ListData {
    Listpack(Vec<Vec<u8>>),
    Quicklist(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetData {
    IntSet(Vec<i64>),
    Listpack(Vec<Vec<u8>>),
    HashTable(std::collections::HashSet<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZSetData {
    Listpack(Vec<(Vec<u8>, ScoreBits)>),
    Skiplist(BTreeMap<Vec<u8>, ScoreBits>),
}

/// Bit pattern carrier for scores so `ZSetData` can derive `PartialEq`
/// without pulling in a float-ordering crate for a type this crate never
/// mutates beyond creation.
pub type ScoreBits = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum HashData {
    Listpack(Vec<(Vec<u8>, Vec<u8>)>),
    HashTable(std::collections::HashMap<Vec<u8>, Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamData {
    pub entries: BTreeMap<(u64, u64), Vec<(Vec<u8>, Vec<u8>)>>,
    pub last_id: (u64, u64),
}

/// The payload carried by a value object, independent of its refcount
/// discipline.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    String(StringData),
    List(ListData),
    Set(SetData),
    SortedSet(ZSetData),
    Hash(HashData),
    Stream(StreamData),
}

impl ValueData {
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueData::String(_) => ValueType::String,
            ValueData::List(_) => ValueType::List,
            ValueData::Set(_) => ValueType::Set,
            ValueData::SortedSet(_) => ValueType::SortedSet,
            ValueData::Hash(_) => ValueType::Hash,
            ValueData::Stream(_) => ValueType::Stream,
        }
    }

    pub fn encoding_name(&self) -> &'static str {
        match self {
            ValueData::String(s) => s.encoding_name(),
            ValueData::List(ListData::Listpack(_)) => "listpack",
            ValueData::List(ListData::Quicklist(_)) => "quicklist",
            ValueData::Set(SetData::IntSet(_)) => "intset",
            ValueData::Set(SetData::Listpack(_)) => "listpack",
            ValueData::Set(SetData::HashTable(_)) => "hashtable",
            ValueData::SortedSet(ZSetData::Listpack(_)) => "listpack",
            ValueData::SortedSet(ZSetData::Skiplist(_)) => "skiplist",
            ValueData::Hash(HashData::Listpack(_)) => "listpack",
            ValueData::Hash(HashData::HashTable(_)) => "hashtable",
            ValueData::Stream(_) => "stream",
        }
    }

    /// Approximate in-memory footprint, used by the byte-accounted memory
    /// governor (C6). Not a precise allocator size; a tracked estimate.
    pub fn approx_size(&self) -> usize {
        match self {
            ValueData::String(s) => s.len(),
            ValueData::List(ListData::Listpack(v)) | ValueData::List(ListData::Quicklist(v)) => {
                v.iter().map(|e| e.len()).sum()
            }
            ValueData::Set(SetData::IntSet(v)) => v.len() * 8,
            ValueData::Set(SetData::Listpack(v)) => v.iter().map(|e| e.len()).sum(),
            ValueData::Set(SetData::HashTable(v)) => v.iter().map(|e| e.len()).sum(),
            ValueData::SortedSet(ZSetData::Listpack(v)) => {
                v.iter().map(|(k, _)| k.len() + 8).sum()
            }
            ValueData::SortedSet(ZSetData::Skiplist(v)) => {
                v.iter().map(|(k, _)| k.len() + 8).sum()
            }
            ValueData::Hash(HashData::Listpack(v)) => {
                v.iter().map(|(k, val)| k.len() + val.len()).sum()
            }
            ValueData::Hash(HashData::HashTable(v)) => {
                v.iter().map(|(k, val)| k.len() + val.len()).sum()
            }
            ValueData::Stream(s) => s
                .entries
                .values()
                .flat_map(|fields| fields.iter().map(|(k, v)| k.len() + v.len()))
                .sum(),
        }
    }
}

/// A stored value: its data plus the refcount discipline it was created
/// under.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data: ValueData,
    pub refkind: RefKind,
}

impl Value {
    pub fn owned(data: ValueData) -> Self {
        Value {
            data,
            refkind: RefKind::Owned,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.data.value_type()
    }

    pub fn encoding_name(&self) -> &'static str {
        self.data.encoding_name()
    }

    pub fn approx_size(&self) -> usize {
        self.data.approx_size()
    }

    /// `retain`/`release` are no-ops on shared values and meaningless on
    /// owned ones (Rust's `Drop` already is `release`); kept for parity
    /// with the design notes' discriminated-union description and to
    /// document where a shared value must never be mutated in place.
    pub fn is_mutable(&self) -> bool {
        matches!(self.refkind, RefKind::Owned)
    }

    pub fn as_string(&self) -> CacheResult<&StringData> {
        match &self.data {
            ValueData::String(s) => Ok(s),
            other => Err(CacheError::InvalidType {
                expected: "string",
                actual: other.value_type().name(),
            }),
        }
    }

    /// Build a string value, choosing Integer/Embedded/Raw encoding the
    /// way `createStringObject` dispatches on length and parseability.
    pub fn from_bytes(bytes: Vec<u8>) -> CacheResult<Value> {
        if bytes.len() > MAX_STRING_LEN {
            return Err(CacheError::Overflow);
        }
        Ok(Value::owned(ValueData::String(StringData::Bytes(bytes))))
    }

    /// Build an integer-encoded string value, consulting the shared pool
    /// the same way `createStringObjectFromLongLongForValue` does.
    pub fn from_integer(n: i64, cfg: &Config) -> Value {
        if use_shared_pool(cfg, n) {
            Value {
                data: ValueData::String(StringData::Integer(n)),
                refkind: RefKind::Shared,
            }
        } else {
            Value::owned(ValueData::String(StringData::Integer(n)))
        }
    }
}

fn use_shared_pool(cfg: &Config, n: i64) -> bool {
    let allowed = cfg.maxmemory == 0 || !cfg.maxmemory_policy.contains(MaxMemoryPolicy::NO_SHARED_INTEGERS);
    allowed && (0..SHARED_INTEGERS).contains(&n)
}

/// Lazily-populated cache of shared small-integer values, an `Arc`-based
/// analogue of `shared.integers[]`. Present so repeated lookups of the
/// same small integer don't keep reallocating identical payloads; unlike
/// the original, this buys nothing for correctness since `Integer` is
/// already an inline `Copy` value; it exists to keep the `RefKind::Shared`
/// path exercised and documented.
static SHARED_INT_POOL: std::sync::OnceLock<Vec<Arc<i64>>> = std::sync::OnceLock::new();

pub fn shared_integer_handle(n: i64) -> Option<Arc<i64>> {
    if !(0..SHARED_INTEGERS).contains(&n) {
        return None;
    }
    let pool = SHARED_INT_POOL.get_or_init(|| (0..SHARED_INTEGERS).map(Arc::new).collect());
    pool.get(n as usize).cloned()
}

/// Obtain an exclusively-owned, mutable Raw byte buffer for `value`,
/// the only sanctioned gateway for in-place string mutation
/// (`dbUnshareStringValue`). If already privately-owned Raw bytes,
/// returns the buffer by value with no copy; otherwise materialises the
/// textual form fresh.
pub fn unshare_string(value: Value) -> CacheResult<Vec<u8>> {
    match value {
        Value {
            data: ValueData::String(StringData::Bytes(b)),
            refkind: RefKind::Owned,
        } => Ok(b),
        Value {
            data: ValueData::String(s),
            ..
        } => Ok(s.as_bytes()),
        other => Err(CacheError::InvalidType {
            expected: "string",
            actual: other.value_type().name(),
        }),
    }
}
