use crate::pps::ioctl;

use std::time::Duration;

const NSEC_PER_SEC: i128 = 1_000_000_000;

/// Leap second indicator shipped alongside every published sample.
///
/// The values are the NTP leap codes.  `NotInSync` marks a source that has
/// not yet proven itself; ntpd treats such a source as being in clock alarm
/// and ignores it rather than declaring it a falseticker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Leap {
    NoWarning = 0,
    AddSecond = 1,
    DeleteSecond = 2,
    NotInSync = 3,
}

impl Leap {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Leap::NoWarning,
            1 => Leap::AddSecond,
            2 => Leap::DeleteSecond,
            _ => Leap::NotInSync,
        }
    }
}

impl From<Leap> for i32 {
    fn from(leap: Leap) -> i32 {
        leap as i32
    }
}

impl Default for Leap {
    fn default() -> Self {
        Leap::NoWarning
    }
}

/// A correlated pair of timestamps to be shipped to a time daemon.
///
/// A sample includes both a "real" value and a "clock" value.
///
/// The "real" value is the time the source asserts as truth: the start of a
/// UTC second for a PPS edge, or the time carried by a decoded fix.
///
/// The "clock" value is the local system clock read taken when the event was
/// observed.  It is always our own clock, never a value derived from the
/// device, and it differs from "real" by however far the system clock has
/// drifted.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeSample {
    /// Seconds of the asserted wall-clock instant
    pub real_sec: i64,
    /// Nanoseconds since the last asserted second boundary
    pub real_nsec: i32,
    /// System clock seconds when the event was observed
    pub clock_sec: i64,
    /// System clock nanoseconds since the last second boundary
    pub clock_nsec: i32,
}

impl TimeSample {
    pub fn new(real_sec: i64, real_nsec: i32, clock_sec: i64, clock_nsec: i32) -> Self {
        TimeSample {
            real_sec,
            real_nsec,
            clock_sec,
            clock_nsec,
        }
    }

    /// Build a sample from a PPS assert edge and the system clock reading
    /// taken at detection.
    pub fn from_pps_time(pps_time: &ioctl::data, now: Duration) -> Self {
        TimeSample {
            real_sec: pps_time.info.assert_tu.sec,
            real_nsec: pps_time.info.assert_tu.nsec,
            clock_sec: now.as_secs() as i64,
            clock_nsec: now.subsec_nanos() as i32,
        }
    }

    /// `real - clock` in seconds.
    ///
    /// Computed from the full nanosecond difference, so it is exact when the
    /// two clocks agree and loses only float precision as they diverge.
    pub fn offset(&self) -> f64 {
        let real = self.real_sec as i128 * NSEC_PER_SEC + self.real_nsec as i128;
        let clock = self.clock_sec as i128 * NSEC_PER_SEC + self.clock_nsec as i128;

        (real - clock) as f64 / 1e9
    }
}
