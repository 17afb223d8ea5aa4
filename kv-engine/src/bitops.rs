//! The bitmap sub-engine (C7): byte-level operations against stored
//! strings, grounded in `bitops.c`'s `RcSetBit`/`RcGetBit`/`RcBitCount`/
//! `RcBitPos`. Bits are addressed big-endian within each byte: bit index
//! `i` is byte `i >> 3`, in-byte position `7 - (i & 7)` (the MSB of a
//! byte is bit 0 of that byte).
//!
//! `redisPopcount`'s hand-rolled SWAR loop is replaced here by
//! `u8::count_ones`, which is the intrinsic the SWAR trick exists to
//! approximate — the manual bit-twiddling has no idiomatic-Rust
//! counterpart worth keeping.

use kv_common::{CacheError, CacheResult};

use crate::keyspace::{Keyspace, LookupFlags};
use crate::value::Value;

fn byte_index(bit_offset: u64) -> usize {
    (bit_offset >> 3) as usize
}

fn bit_in_byte(bit_offset: u64) -> u8 {
    7 - (bit_offset & 0x7) as u8
}

/// `SETBIT key offset value`. Returns the bit's previous value.
pub fn set_bit(ks: &mut Keyspace, key: &[u8], offset: u64, on: u8) -> CacheResult<u8> {
    if on > 1 {
        return Err(CacheError::InvalidArg("bit value must be 0 or 1".into()));
    }
    let needed_len = byte_index(offset) + 1;

    let existing = ks.lookup(key, LookupFlags::WRITE);
    let mut buf = match existing {
        Some(v) => crate::value::unshare_string(v.clone())?,
        None => Vec::new(),
    };
    if buf.len() < needed_len {
        buf.resize(needed_len, 0);
    }

    let idx = byte_index(offset);
    let bit = bit_in_byte(offset);
    let old = (buf[idx] >> bit) & 1;
    buf[idx] = (buf[idx] & !(1 << bit)) | (on << bit);

    let value = Value::from_bytes(buf)?;
    if ks.contains(key) {
        ks.overwrite(key, value)?;
    } else {
        ks.add(key.to_vec(), value);
    }
    Ok(old)
}

/// `GETBIT key offset`. Absent keys and out-of-range offsets read as 0,
/// the canonical "infinite zero-padded string" convention.
pub fn get_bit(ks: &mut Keyspace, key: &[u8], offset: u64) -> CacheResult<u8> {
    let Some(value) = ks.lookup(key, LookupFlags::empty()) else {
        return Ok(0);
    };
    let bytes = value.as_string()?.as_bytes();
    let idx = byte_index(offset);
    if idx >= bytes.len() {
        return Ok(0);
    }
    let bit = bit_in_byte(offset);
    Ok((bytes[idx] >> bit) & 1)
}

fn popcount(buf: &[u8]) -> u64 {
    buf.iter().map(|b| b.count_ones() as u64).sum()
}

/// `BITCOUNT key [start end [BIT|BYTE]]`.
pub fn bit_count(
    ks: &mut Keyspace,
    key: &[u8],
    range: Option<(i64, i64, bool)>,
) -> CacheResult<u64> {
    let Some(value) = ks.lookup(key, LookupFlags::empty()) else {
        return Err(CacheError::KeyNotExist);
    };
    let bytes = value.as_string()?.as_bytes();
    let strlen = bytes.len() as i64;

    let (mut start, mut end, mut first_mask, mut last_mask) = (0i64, strlen - 1, 0u8, 0u8);
    if let Some((s, e, isbit)) = range {
        if s < 0 && e < 0 && s > e {
            return Ok(0);
        }
        let mut start_ = s;
        let mut end_ = e;
        let totlen = if isbit { strlen << 3 } else { strlen };
        if start_ < 0 {
            start_ = totlen + start_;
        }
        if end_ < 0 {
            end_ = totlen + end_;
        }
        if start_ < 0 {
            start_ = 0;
        }
        if end_ < 0 {
            end_ = 0;
        }
        if end_ >= totlen {
            end_ = totlen - 1;
        }
        if isbit && start_ <= end_ {
            first_mask = !((1u16 << (8 - (start_ & 7))) - 1) as u8;
            last_mask = ((1u16 << (7 - (end_ & 7))) - 1) as u8;
            start_ >>= 3;
            end_ >>= 3;
        }
        start = start_;
        end = end_;
    }

    if start > end || strlen == 0 {
        return Ok(0);
    }
    let (s, e) = (start as usize, end as usize);
    let mut count = popcount(&bytes[s..=e]);
    if first_mask != 0 || last_mask != 0 {
        let mut firstlast = [0u8, 0u8];
        if first_mask != 0 {
            firstlast[0] = bytes[s] & first_mask;
        }
        if last_mask != 0 {
            firstlast[1] = bytes[e] & last_mask;
        }
        count -= popcount(&firstlast);
    }
    Ok(count)
}

/// Parsed `BITPOS` range form, matching `BIT_POS_*` in the original.
#[derive(Debug, Clone, Copy)]
pub enum BitPosRange {
    NoOffset,
    StartOffset { start: i64 },
    StartEndOffset { start: i64, end: i64 },
}

/// `BITPOS key bit [start [end [BIT|BYTE]]]`.
pub fn bit_pos(
    ks: &mut Keyspace,
    key: &[u8],
    bit: u8,
    range: BitPosRange,
    isbit: bool,
) -> CacheResult<i64> {
    if bit > 1 {
        return Err(CacheError::InvalidArg("bit must be 0 or 1".into()));
    }
    let Some(value) = ks.lookup(key, LookupFlags::empty()) else {
        // Absent key: an infinite array of zero bits.
        return Ok(if bit == 0 { 0 } else { -1 });
    };
    let bytes = value.as_string()?.as_bytes();
    let strlen = bytes.len() as i64;

    let mut end_given = false;
    let (mut start, mut end) = (0i64, 0i64);
    let mut first_mask = 0u8;
    let mut last_mask = 0u8;

    match range {
        BitPosRange::NoOffset => {
            start = 0;
            end = strlen - 1;
        }
        BitPosRange::StartOffset { start: s } => {
            start = s;
            end = if isbit { (strlen << 3) + 7 } else { strlen - 1 };
        }
        BitPosRange::StartEndOffset { start: s, end: e } => {
            start = s;
            end = e;
            end_given = true;
        }
    }

    let totlen = if isbit { strlen << 3 } else { strlen };
    if start < 0 {
        start = totlen + start;
    }
    if end < 0 {
        end = totlen + end;
    }
    if start < 0 {
        start = 0;
    }
    if end < 0 {
        end = 0;
    }
    if end >= totlen {
        end = totlen - 1;
    }
    if isbit && start <= end {
        first_mask = !((1u16 << (8 - (start & 7))) - 1) as u8;
        last_mask = ((1u16 << (7 - (end & 7))) - 1) as u8;
        start >>= 3;
        end >>= 3;
    }

    if start > end {
        return Ok(-1);
    }

    Ok(bitpos_core(
        &bytes,
        bit,
        start as usize,
        end as usize,
        first_mask,
        last_mask,
        end_given,
    ))
}

/// Position of the first bit equal to `bit` within `buf`, scanned whole
/// bytes at a time and then bit-by-bit (MSB to LSB) within the first
/// non-uniform byte. Returns -1 if `bit == 1` and none is set; if
/// `bit == 0` and the whole slice is `0xFF`, returns `buf.len() * 8`
/// (the position one past the end), matching the "zero padded on the
/// right" convention the caller relies on.
fn scan_bit_in_slice(buf: &[u8], bit: u8) -> i64 {
    for (i, &byte) in buf.iter().enumerate() {
        let uniform = if bit == 1 { byte == 0 } else { byte == 0xFF };
        if uniform {
            continue;
        }
        for b in 0..8u8 {
            let mask = 1u8 << (7 - b);
            let set = (byte & mask) != 0;
            if (set as u8) == bit {
                return (i as i64) * 8 + b as i64;
            }
        }
    }
    if bit == 1 {
        -1
    } else {
        (buf.len() as i64) * 8
    }
}

fn bitpos_core(
    buf: &[u8],
    bit: u8,
    start0: usize,
    end: usize,
    first_mask: u8,
    last_mask: u8,
    end_given: bool,
) -> i64 {
    let finalize = |pos: i64, start: usize, subregion_len: usize| -> i64 {
        if end_given && bit == 0 && pos == (subregion_len as i64) << 3 {
            return -1;
        }
        if pos == -1 {
            -1
        } else {
            pos + ((start as i64) << 3)
        }
    };

    let mut start = start0;
    let total_bytes = end - start + 1;

    if first_mask != 0 {
        let mut tmpchar = if bit == 1 {
            buf[start] & !first_mask
        } else {
            buf[start] | first_mask
        };
        if last_mask != 0 && total_bytes == 1 {
            tmpchar = if bit == 1 {
                tmpchar & !last_mask
            } else {
                tmpchar | last_mask
            };
        }
        let pos = scan_bit_in_slice(&[tmpchar], bit);
        if total_bytes == 1 || (pos != -1 && pos != 8) {
            return finalize(pos, start, 1);
        }
        start += 1;
    }

    let bytes_left = end - start + 1;
    let curbytes = bytes_left - if last_mask != 0 { 1 } else { 0 };
    if curbytes > 0 {
        let pos = scan_bit_in_slice(&buf[start..start + curbytes], bit);
        if bytes_left == curbytes || (pos != -1 && pos != (curbytes as i64) << 3) {
            return finalize(pos, start, curbytes);
        }
        start += curbytes;
    }

    let tmpchar = if bit == 1 {
        buf[end] & !last_mask
    } else {
        buf[end] | last_mask
    };
    let pos = scan_bit_in_slice(&[tmpchar], bit);
    finalize(pos, start, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setbit_on_absent_key_creates_single_byte() {
        let mut ks = Keyspace::new();
        set_bit(&mut ks, b"k", 0, 1).unwrap();
        assert_eq!(get_bit(&mut ks, b"k", 0).unwrap(), 1);
        let v = ks.lookup(b"k", LookupFlags::empty()).unwrap();
        assert_eq!(v.as_string().unwrap().as_bytes(), vec![0x80]);
    }

    #[test]
    fn setbit_offset_15_creates_two_bytes() {
        let mut ks = Keyspace::new();
        set_bit(&mut ks, b"k", 15, 1).unwrap();
        let v = ks.lookup(b"k", LookupFlags::empty()).unwrap();
        assert_eq!(v.as_string().unwrap().as_bytes(), vec![0x00, 0x01]);
    }

    #[test]
    fn setbit_7_then_getbit_pattern() {
        let mut ks = Keyspace::new();
        set_bit(&mut ks, b"k", 7, 1).unwrap();
        let bits: Vec<u8> = (0..8).map(|i| get_bit(&mut ks, b"k", i).unwrap()).collect();
        assert_eq!(bits, vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(bit_count(&mut ks, b"k", Some((0, 0, false))).unwrap(), 1);
    }

    #[test]
    fn bitcount_matches_popcount_over_whole_string() {
        let mut ks = Keyspace::new();
        set_bit(&mut ks, b"k", 0, 1).unwrap();
        set_bit(&mut ks, b"k", 5, 1).unwrap();
        set_bit(&mut ks, b"k", 9, 1).unwrap();
        let v = ks.lookup(b"k", LookupFlags::empty()).unwrap();
        let bytes = v.as_string().unwrap().as_bytes();
        assert_eq!(
            bit_count(&mut ks, b"k", None).unwrap(),
            popcount(&bytes)
        );
    }

    #[test]
    fn bitpos_example_from_spec() {
        let mut ks = Keyspace::new();
        let v = Value::from_bytes(vec![0x00, 0x0F]).unwrap();
        ks.add(b"k".to_vec(), v);
        let pos = bit_pos(
            &mut ks,
            b"k",
            1,
            BitPosRange::StartEndOffset { start: 0, end: -1 },
            true,
        )
        .unwrap();
        assert_eq!(pos, 12);
    }

    #[test]
    fn bitpos_absent_key() {
        let mut ks = Keyspace::new();
        assert_eq!(
            bit_pos(&mut ks, b"missing", 0, BitPosRange::NoOffset, false).unwrap(),
            0
        );
        assert_eq!(
            bit_pos(&mut ks, b"missing", 1, BitPosRange::NoOffset, false).unwrap(),
            -1
        );
    }
}
