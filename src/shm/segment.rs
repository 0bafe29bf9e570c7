use crate::shm::DEFAULT_PRECISION;
use crate::timestamp::Leap;
use crate::timestamp::TimeSample;

use anyhow::Context;
use anyhow::Result;

use std::io;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::fence;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicIsize;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use tracing::error;
use tracing::trace;

/// One ntpd shared-memory refclock segment.
///
/// The layout matches `struct shmTime` from ntpd's driver 28 as described at
/// http://doc.ntp.org/4.2.8/drivers/driver28.html.  The two seconds fields
/// are `time_t` there, so they are pointer-sized here.
///
/// Every field is an atomic so stores into the mapped segment are real
/// memory operations that cannot tear or be optimized away, and so the
/// fences in [`publish`][ShmTime::publish] and [`read`][ShmTime::read]
/// order them.
#[repr(C)]
pub struct ShmTime {
    pub mode: AtomicI32,
    pub count: AtomicI32,
    pub clock_sec: AtomicIsize,
    pub clock_usec: AtomicI32,
    pub receive_sec: AtomicIsize,
    pub receive_usec: AtomicI32,
    pub leap: AtomicI32,
    pub precision: AtomicI32,
    pub nsamples: AtomicI32,
    pub valid: AtomicI32,
    pub clock_nsec: AtomicU32,
    pub receive_nsec: AtomicU32,
    // scratch area for ntpd, never touched from this side
    _dummy: [i32; 8],
}

impl ShmTime {
    /// Return the segment to its freshly-allocated state.
    ///
    /// The leap indicator starts at `NotInSync` so that ntpd ignores the
    /// unit until a real sample lands, instead of declaring the source a
    /// falseticker while it warms up.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.clock_sec.store(0, Ordering::Relaxed);
        self.clock_usec.store(0, Ordering::Relaxed);
        self.receive_sec.store(0, Ordering::Relaxed);
        self.receive_usec.store(0, Ordering::Relaxed);
        self.valid.store(0, Ordering::Relaxed);
        self.clock_nsec.store(0, Ordering::Relaxed);
        self.receive_nsec.store(0, Ordering::Relaxed);

        self.mode.store(1, Ordering::Relaxed);
        self.leap.store(Leap::NotInSync.into(), Ordering::Relaxed);
        self.precision.store(DEFAULT_PRECISION, Ordering::Relaxed);
        // stages of ntpd's median filter
        self.nsamples.store(3, Ordering::Relaxed);
    }

    /// Publish a sample using the mode 1 write protocol.
    ///
    /// valid drops and count goes odd for the whole update, so a reader
    /// that saw a stable even count got untorn fields.
    ///
    /// Returns the count after the update.
    pub fn publish(&self, ts: &TimeSample, precision: i32, leap: Leap) -> i32 {
        // ntpd's names are from its point of view: "clock" is the time the
        // reference clock asserted, "receive" is the local clock when the
        // sample was taken.
        self.valid.store(0, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        fence(Ordering::SeqCst);

        self.clock_sec.store(ts.real_sec as isize, Ordering::Relaxed);
        self.clock_usec.store(ts.real_nsec / 1000, Ordering::Relaxed);

        self.receive_sec.store(ts.clock_sec as isize, Ordering::Relaxed);
        self.receive_usec.store(ts.clock_nsec / 1000, Ordering::Relaxed);

        self.leap.store(leap.into(), Ordering::Relaxed);

        self.precision.store(precision, Ordering::Relaxed);

        self.clock_nsec.store(ts.real_nsec as u32, Ordering::Relaxed);
        self.receive_nsec.store(ts.clock_nsec as u32, Ordering::Relaxed);

        fence(Ordering::SeqCst);

        self.count.fetch_add(1, Ordering::Relaxed);
        self.valid.store(1, Ordering::Relaxed);

        self.count.load(Ordering::Relaxed)
    }

    /// Snapshot the segment if it has changed since `last_count`.
    ///
    /// In mode 1 ntpd resets valid and bumps count after reading values, so
    /// valid cannot be trusted while sampling.  Instead we make a
    /// best-effort by tracking count: if it differs from the last go-around
    /// and did not change while reading we probably got new values, so we
    /// report them.
    pub fn read(&self, last_count: i32) -> Option<ShmSample> {
        let count_before = self.count.load(Ordering::Relaxed);

        if count_before == last_count {
            return None;
        }

        fence(Ordering::SeqCst);

        let sample = ShmSample {
            mode: self.mode.load(Ordering::Relaxed),
            count: count_before,
            clock_sec: self.clock_sec.load(Ordering::Relaxed),
            clock_usec: self.clock_usec.load(Ordering::Relaxed),
            receive_sec: self.receive_sec.load(Ordering::Relaxed),
            receive_usec: self.receive_usec.load(Ordering::Relaxed),
            leap: self.leap.load(Ordering::Relaxed),
            precision: self.precision.load(Ordering::Relaxed),
            nsamples: self.nsamples.load(Ordering::Relaxed),
            valid: self.valid.load(Ordering::Relaxed),
            clock_nsec: self.clock_nsec.load(Ordering::Relaxed),
            receive_nsec: self.receive_nsec.load(Ordering::Relaxed),
        };

        fence(Ordering::SeqCst);

        let count_after = self.count.load(Ordering::Relaxed);

        if count_before != count_after {
            // We probably raced a clock write or an ntpd read.
            return None;
        }

        Some(sample)
    }
}

impl Default for ShmTime {
    fn default() -> Self {
        ShmTime {
            mode: AtomicI32::new(0),
            count: AtomicI32::new(0),
            clock_sec: AtomicIsize::new(0),
            clock_usec: AtomicI32::new(0),
            receive_sec: AtomicIsize::new(0),
            receive_usec: AtomicI32::new(0),
            leap: AtomicI32::new(0),
            precision: AtomicI32::new(0),
            nsamples: AtomicI32::new(0),
            valid: AtomicI32::new(0),
            clock_nsec: AtomicU32::new(0),
            receive_nsec: AtomicU32::new(0),
            _dummy: [0; 8],
        }
    }
}

/// A consistent snapshot of one segment's fields.
#[derive(Clone, Copy, Debug)]
pub struct ShmSample {
    pub mode: i32,
    pub count: i32,
    pub clock_sec: isize,
    pub clock_usec: i32,
    pub receive_sec: isize,
    pub receive_usec: i32,
    pub leap: i32,
    pub precision: i32,
    pub nsamples: i32,
    pub valid: i32,
    pub clock_nsec: u32,
    pub receive_nsec: u32,
}

/// A SysV shared memory segment mapped at one of ntpd's well-known keys.
pub struct ShmSegment {
    time: NonNull<ShmTime>,
    pub unit: i32,
    pub id: i32,
}

impl ShmSegment {
    /// Create or look up the segment for `unit` relative to `base` and map
    /// it.
    ///
    /// Units 0 and 1 are reserved for root-only time daemons, so their
    /// segments are created mode 0600; the rest are world accessible.
    pub fn attach(base: i32, unit: i32) -> Result<Self> {
        let permissions = if unit <= 1 { 0o600 } else { 0o666 };

        let id = get_id(base + unit, permissions)?;

        let shm;

        unsafe {
            shm = libc::shmat(id, std::ptr::null(), 0);
        }

        if -1 == shm as isize {
            Err(io::Error::last_os_error())
                .with_context(|| format!("Unable to map shared memory for unit {}", unit))
        } else {
            let time = NonNull::new(shm as *mut ShmTime).unwrap();

            Ok(ShmSegment { time, unit, id })
        }
    }

    pub fn time(&self) -> &ShmTime {
        unsafe { self.time.as_ref() }
    }

    pub fn publish(&self, ts: &TimeSample, precision: i32, leap: Leap) {
        let count = self.time().publish(ts, precision, leap);

        trace!(
            "set NTP timestamp on unit {} count {}: {}.{:09} @ {}.{:09}",
            self.unit,
            count,
            ts.real_sec,
            ts.real_nsec,
            ts.clock_sec,
            ts.clock_nsec
        );
    }

    pub fn read(&self, last_count: i32) -> Option<ShmSample> {
        let sample = self.time().read(last_count)?;

        trace!(
            "read NTP timestamp on unit {} count {}: {:?}",
            self.unit,
            sample.count,
            sample
        );

        Some(sample)
    }
}

// The mapping stays valid until shmdt in Drop and all access to the mapped
// struct goes through atomics.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        let time = self.time.as_ptr();

        let ok;

        unsafe {
            ok = libc::shmdt(time as *const libc::c_void);
        }

        if -1 == ok {
            let error = io::Error::last_os_error();
            error!(
                "unable to unmap shared memory unit {} ({:?})",
                self.unit, error
            );
        }
    }
}

fn get_id(key: i32, perms: i32) -> Result<i32> {
    let size = mem::size_of::<ShmTime>();
    let flags = libc::IPC_CREAT | perms;

    let id;

    unsafe {
        id = libc::shmget(key, size, flags);
    }

    if -1 == id {
        Err(io::Error::last_os_error())
            .with_context(|| format!("Unable to get shared memory key {:#x}", key))
    } else {
        Ok(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::shm::PPS_PRECISION;

    use std::sync::Arc;
    use std::thread;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_layout_matches_ntpd() {
        assert_eq!(96, mem::size_of::<ShmTime>());
        assert_eq!(8, mem::align_of::<ShmTime>());
    }

    #[test]
    fn test_reset_defaults() {
        let time = ShmTime::default();
        time.count.store(9, Ordering::Relaxed);
        time.valid.store(1, Ordering::Relaxed);

        time.reset();

        assert_eq!(1, time.mode.load(Ordering::Relaxed));
        assert_eq!(0, time.count.load(Ordering::Relaxed));
        assert_eq!(0, time.valid.load(Ordering::Relaxed));
        assert_eq!(3, time.leap.load(Ordering::Relaxed));
        assert_eq!(-1, time.precision.load(Ordering::Relaxed));
        assert_eq!(3, time.nsamples.load(Ordering::Relaxed));
    }

    #[test]
    fn test_publish_read_round_trip() {
        let time = ShmTime::default();
        time.reset();

        let sample = TimeSample::new(1_660_000_000, 123_456_789, 1_660_000_001, 987_654_321);

        time.publish(&sample, PPS_PRECISION, Leap::NoWarning);

        let read = time.read(0).unwrap();

        assert_eq!(1, read.mode);
        assert_eq!(2, read.count);
        assert_eq!(1_660_000_000, read.clock_sec);
        assert_eq!(123_456, read.clock_usec);
        assert_eq!(123_456_789, read.clock_nsec);
        assert_eq!(1_660_000_001, read.receive_sec);
        assert_eq!(987_654, read.receive_usec);
        assert_eq!(987_654_321, read.receive_nsec);
        assert_eq!(0, read.leap);
        assert_eq!(-20, read.precision);
        assert_eq!(3, read.nsamples);
        assert_eq!(1, read.valid);
    }

    #[test]
    fn test_read_unchanged_count() {
        let time = ShmTime::default();
        time.reset();

        assert!(time.read(0).is_none());

        let sample = TimeSample::new(1_660_000_000, 0, 1_660_000_000, 0);
        time.publish(&sample, DEFAULT_PRECISION, Leap::NoWarning);

        let read = time.read(0).unwrap();
        assert!(time.read(read.count).is_none());
    }

    #[test]
    fn test_publish_is_not_torn() {
        let time = Arc::new(ShmTime::default());
        time.reset();

        let writer_time = time.clone();

        let writer = thread::spawn(move || {
            for i in 1..=5_000 {
                let sample = TimeSample::new(i, i as i32, i, i as i32);

                writer_time.publish(&sample, PPS_PRECISION, Leap::NoWarning);
            }
        });

        let mut last_count = 0;

        while !writer.is_finished() {
            if let Some(sample) = time.read(last_count) {
                last_count = sample.count;

                // an odd count is a publish still in flight
                if sample.count % 2 != 0 {
                    continue;
                }

                assert_eq!(sample.clock_sec, sample.receive_sec);
                assert_eq!(sample.clock_sec as u32, sample.clock_nsec);
                assert_eq!(sample.clock_nsec, sample.receive_nsec);
            }
        }

        writer.join().unwrap();

        let last = time.read(0).unwrap();

        assert_eq!(10_000, last.count);
        assert_eq!(5_000, last.clock_sec);
        assert_eq!(5_000, last.receive_sec);
        assert_eq!(1, last.valid);
    }
}
