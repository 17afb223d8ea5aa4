//! Size limits shared between the engine and the façade.

/// Largest a single string value is allowed to grow to (bytes), matching
/// the original server's `proto-max-bulk-len`-derived string cap.
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Threshold below which a string is stored in the embedded (header +
/// payload in one allocation) encoding rather than raw.
pub const EMBSTR_SIZE_LIMIT: usize = 44;
