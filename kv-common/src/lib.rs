//! Shared error taxonomy and limits for the kv-cache engine.

pub mod error;
pub mod limits;

pub use error::{CacheError, CacheResult, ErrorReport};
pub use limits::{EMBSTR_SIZE_LIMIT, MAX_STRING_LEN};
