//! Access tracking: the 24-bit per-entry field that feeds both the LRU
//! and LFU eviction policies, grounded in `updateLFU`/`LRU_CLOCK` from
//! the original `db.c`.

use rand::Rng;

use crate::config::Config;

/// Initial LFU counter value, matching `LFU_INIT_VAL`.
const LFU_INIT_VAL: u8 = 5;
/// Counter ceiling, matching `LFU_MAX_VAL` (255, a full byte).
const LFU_MAX_VAL: u8 = 255;

/// 24-bit access metadata, mirroring `robj.lru`. Under LRU it's a coarse
/// clock sample; under LFU it packs a 16-bit last-decrement minute and
/// an 8-bit logarithmic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMeta(u32);

impl AccessMeta {
    const MASK: u32 = 0x00FF_FFFF;

    pub fn lru_now(clock: &Clock) -> Self {
        AccessMeta(clock.sample() & Self::MASK)
    }

    pub fn lfu_new() -> Self {
        Self::pack_lfu(current_minute() as u16, LFU_INIT_VAL)
    }

    fn pack_lfu(minute: u16, counter: u8) -> Self {
        AccessMeta(((minute as u32) << 8 | counter as u32) & Self::MASK)
    }

    fn unpack_lfu(self) -> (u16, u8) {
        ((self.0 >> 8) as u16, (self.0 & 0xFF) as u8)
    }

    /// Idle score under LRU: modular distance from the current clock.
    /// Higher means "more idle", i.e. more evictable.
    pub fn lru_idle(self, clock: &Clock) -> u32 {
        clock.sample().wrapping_sub(self.0) & Clock::MASK
    }

    /// Idle score under LFU: inverse of the decayed counter, so a hot key
    /// (high counter) reads as low idle and a cold key reads as high
    /// idle — the same "higher is more evictable" convention as LRU.
    pub fn lfu_idle(self) -> u8 {
        let (_, counter) = self.unpack_lfu();
        LFU_MAX_VAL - counter
    }

    /// Apply decay-then-increment on an access, per `updateLFU`. Returns
    /// the updated metadata.
    pub fn lfu_touch(self, cfg: &Config, rng: &mut impl Rng) -> Self {
        let (last_minute, counter) = self.unpack_lfu();
        let decayed = lfu_decay(counter, last_minute, cfg.lfu_decay_time);
        let bumped = lfu_log_incr(decayed, cfg.lfu_log_factor, rng);
        Self::pack_lfu(current_minute() as u16, bumped)
    }

    pub fn touch_lru(self, clock: &Clock) -> Self {
        Self::lru_now(clock)
    }
}

/// Decay the counter for elapsed minutes since `last_minute`, matching
/// `LFUDecrAndReturn`. `minute` wraps at 2^16; the subtraction below is
/// modular so a wrap doesn't produce a spurious huge decay.
fn lfu_decay(counter: u8, last_minute: u16, lfu_decay_time: u64) -> u8 {
    if lfu_decay_time == 0 {
        return counter;
    }
    let now = current_minute() as u16;
    let elapsed = now.wrapping_sub(last_minute) as u64;
    let periods = elapsed / lfu_decay_time;
    if periods == 0 {
        counter
    } else {
        counter.saturating_sub(periods.min(u8::MAX as u64) as u8)
    }
}

/// Logarithmic counter increment, matching `LFULogIncr`: with probability
/// `1 / (1 + (counter - LFU_INIT_VAL) * lfu_log_factor)`, bump by one, up
/// to `LFU_MAX_VAL`.
fn lfu_log_incr(counter: u8, lfu_log_factor: u64, rng: &mut impl Rng) -> u8 {
    if counter >= LFU_MAX_VAL {
        return counter;
    }
    let base = (counter.saturating_sub(LFU_INIT_VAL)) as f64;
    let p = 1.0 / (1.0 + base * lfu_log_factor as f64);
    if rng.gen::<f64>() < p {
        counter + 1
    } else {
        counter
    }
}

fn current_minute() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() / 60)
        .unwrap_or(0)
}

/// Coarse monotonic clock used by the LRU path, resolution one second,
/// stored in 24 bits so it shares width with the LFU packing.
#[derive(Debug)]
pub struct Clock {
    start: std::time::Instant,
}

impl Clock {
    const MASK: u32 = 0x00FF_FFFF;

    pub fn new() -> Self {
        Clock {
            start: std::time::Instant::now(),
        }
    }

    pub fn sample(&self) -> u32 {
        (self.start.elapsed().as_secs() as u32) & Self::MASK
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn lru_idle_grows_with_elapsed_clock() {
        let clock = Clock::new();
        let meta = AccessMeta::lru_now(&clock);
        assert_eq!(meta.lru_idle(&clock), 0);
    }

    #[test]
    fn lfu_counter_starts_at_init_value() {
        let meta = AccessMeta::lfu_new();
        let (_, counter) = meta.unpack_lfu();
        assert_eq!(counter, LFU_INIT_VAL);
    }

    #[test]
    fn lfu_decay_is_monotonic_non_increasing() {
        let mut counter = 200u8;
        let mut last_minute = 0u16;
        for step in 1..20u16 {
            let decayed = lfu_decay(counter, last_minute, 1);
            assert!(decayed <= counter);
            counter = decayed;
            last_minute = step;
        }
    }

    #[test]
    fn lfu_log_incr_always_increments_at_init_value() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        // at counter == LFU_INIT_VAL, base = 0, p = 1.0: always increments.
        let next = lfu_log_incr(LFU_INIT_VAL, 10, &mut rng);
        assert_eq!(next, LFU_INIT_VAL + 1);
    }

    #[test]
    fn lfu_log_incr_never_exceeds_max() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(2);
        assert_eq!(lfu_log_incr(LFU_MAX_VAL, 10, &mut rng), LFU_MAX_VAL);
    }
}
