//! Error taxonomy shared by the keyspace engine and its callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every fallible keyspace operation resolves to this alias.
pub type CacheResult<T> = Result<T, CacheError>;

/// Closed error taxonomy for the cache engine.
///
/// Variants map onto the small negative-integer surface a non-Rust caller
/// expects (see [`CacheError::code`]); inside the crate everything flows
/// through `Result`/`?` instead of raw codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("wrong type: key holds {actual}, expected {expected}")]
    InvalidType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("key does not exist")]
    KeyNotExist,

    #[error("value is not an integer or out of range")]
    Overflow,

    #[error("no keys in keyspace")]
    NoKeys,

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    MemoryFull,

    /// An internal invariant was violated. Never expected in practice; see
    /// `bitops::bitpos`'s unreachable branch for the one documented source.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl CacheError {
    /// Small stable integer code for callers that don't want to match on
    /// the `Display`/`Debug` text.
    pub fn code(&self) -> i32 {
        match self {
            CacheError::InvalidArg(_) => -1,
            CacheError::InvalidType { .. } => -2,
            CacheError::KeyNotExist => -3,
            CacheError::Overflow => -4,
            CacheError::NoKeys => -5,
            CacheError::MemoryFull => -6,
            CacheError::Internal(_) => -7,
        }
    }
}

/// Serializable mirror of [`CacheError::code`], useful when an embedding
/// host wants to round-trip an error across a boundary that only
/// understands plain data (e.g. a config-reload report).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: i32,
    pub message: String,
}

impl From<&CacheError> for ErrorReport {
    fn from(err: &CacheError) -> Self {
        ErrorReport {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_stable() {
        let variants = [
            CacheError::InvalidArg("x".into()),
            CacheError::InvalidType {
                expected: "string",
                actual: "list",
            },
            CacheError::KeyNotExist,
            CacheError::Overflow,
            CacheError::NoKeys,
            CacheError::MemoryFull,
            CacheError::Internal("x"),
        ];
        let codes: Vec<i32> = variants.iter().map(CacheError::code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        for v in &variants {
            assert!(!v.to_string().is_empty());
        }
    }
}
