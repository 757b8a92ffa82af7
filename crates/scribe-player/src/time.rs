//! Nanosecond timecode helpers for front ends.
//!
//! Positions and durations travel through the engine as `u64`
//! nanoseconds; front ends display them as clock time with hours allowed
//! to exceed 24.

use std::fmt;

/// Nanoseconds per second.
pub const NS_PER_SECOND: u64 = 1_000_000_000;
const NS_PER_MICRO: u64 = 1_000;

/// A split clock-time representation of a nanosecond offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    pub hours: u64,
    /// 0-59
    pub minutes: u8,
    /// 0-59
    pub seconds: u8,
    /// 0-999_999
    pub micros: u32,
}

impl Timecode {
    /// Split a nanosecond offset into clock components. Sub-microsecond
    /// precision is dropped.
    pub fn from_ns(ns: u64) -> Self {
        let total_micros = ns / NS_PER_MICRO;
        let total_seconds = total_micros / 1_000_000;
        Self {
            hours: total_seconds / 3600,
            minutes: ((total_seconds / 60) % 60) as u8,
            seconds: (total_seconds % 60) as u8,
            micros: (total_micros % 1_000_000) as u32,
        }
    }

    /// Nanosecond offset for these clock components.
    pub fn to_ns(self) -> u64 {
        let seconds = self.hours * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds);
        seconds * NS_PER_SECOND + u64::from(self.micros) * NS_PER_MICRO
    }
}

impl fmt::Display for Timecode {
    /// `H:MM:SS.t` with tenths of a second, the resolution transcribers
    /// actually work at.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenths = self.micros / 100_000;
        write!(
            f,
            "{}:{:02}:{:02}.{}",
            self.hours, self.minutes, self.seconds, tenths
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ns_splits_components() {
        let tc = Timecode::from_ns(3_725_500_000_000);
        assert_eq!(tc.hours, 1);
        assert_eq!(tc.minutes, 2);
        assert_eq!(tc.seconds, 5);
        assert_eq!(tc.micros, 500_000);
    }

    #[test]
    fn hours_may_exceed_24() {
        let tc = Timecode::from_ns(30 * 3600 * NS_PER_SECOND);
        assert_eq!(tc.hours, 30);
        assert_eq!(tc.minutes, 0);
    }

    #[test]
    fn round_trips_at_microsecond_resolution() {
        let ns = 7_261_123_456_000;
        assert_eq!(Timecode::from_ns(ns).to_ns(), ns);
    }

    #[test]
    fn display_uses_tenths() {
        assert_eq!(Timecode::from_ns(65_250_000_000).to_string(), "0:01:05.2");
        assert_eq!(Timecode::from_ns(0).to_string(), "0:00:00.0");
    }
}
