mod pool;
mod segment;
mod watch;

pub use pool::SegmentPool;
pub use segment::ShmSample;
pub use segment::ShmSegment;
pub use segment::ShmTime;
pub use watch::NtpShm;
pub use watch::ShmUpdate;

/// Key of refclock unit 0, "NTP0".  Unit n lives at NTPD_BASE + n.
pub const NTPD_BASE: i32 = 0x4e545030;

/// Enough units for a coarse and a PPS segment on four devices.
pub const NTP_SHM_SEGMENTS: usize = 8;

/// Precision reported for coarse in-band time, about half a second.
pub const DEFAULT_PRECISION: i32 = -1;

/// Precision ntpd expects from a PPS refclock, about a microsecond.
pub const PPS_PRECISION: i32 = -20;
