//! Normalized second/nanosecond timestamps.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Wall-clock instant as UMAA messages carry it: whole seconds plus a
/// nanosecond remainder in `[0, 1e9)`. Construction normalizes, so the
/// derived ordering and equality are total over the represented instant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl Timestamp {
    /// Build from possibly out-of-range parts; nanoseconds are folded into
    /// seconds and the remainder is made non-negative.
    pub fn new(seconds: i64, nanoseconds: i64) -> Self {
        let sec = seconds + nanoseconds.div_euclid(NANOS_PER_SEC);
        let nsec = nanoseconds.rem_euclid(NANOS_PER_SEC);
        Timestamp {
            seconds: sec,
            nanoseconds: nsec as u32,
        }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp::new(d.as_secs() as i64, d.subsec_nanos() as i64),
            // Clock before epoch: clamp to zero rather than panic.
            Err(_) => Timestamp::default(),
        }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 / NANOS_PER_SEC as f64
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}.{:09})", self.seconds, self.nanoseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_nanosecond_overflow() {
        let t = Timestamp::new(1, 1_500_000_000);
        assert_eq!(t.seconds(), 2);
        assert_eq!(t.nanoseconds(), 500_000_000);
    }

    #[test]
    fn normalizes_negative_nanoseconds() {
        let t = Timestamp::new(2, -500_000_000);
        assert_eq!(t.seconds(), 1);
        assert_eq!(t.nanoseconds(), 500_000_000);
    }

    #[test]
    fn ordering_follows_instant() {
        let a = Timestamp::new(1, 999_999_999);
        let b = Timestamp::new(2, 0);
        assert!(a < b);
        assert_eq!(Timestamp::new(1, NANOS_PER_SEC), b);
    }

    #[test]
    fn now_is_past_epoch() {
        assert!(Timestamp::now().seconds() > 0);
    }
}
