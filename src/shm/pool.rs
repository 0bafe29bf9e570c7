use crate::shm::ShmSegment;
use crate::shm::NTPD_BASE;
use crate::shm::NTP_SHM_SEGMENTS;

use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;
use tracing::error;

/// The fixed set of ntpd refclock segments this process can feed.
///
/// Segments are attached once, up front, and handed out to device sessions
/// as they activate.  A segment that fails to attach leaves a hole in the
/// pool rather than failing the whole process.
pub struct SegmentPool {
    segments: Vec<Option<Arc<ShmSegment>>>,
    in_use: Mutex<Vec<bool>>,
}

impl SegmentPool {
    /// Attach the standard refclock segments.
    ///
    /// Call this while still privileged: units 0 and 1 belong to root-only
    /// time daemons and are skipped entirely for ordinary users, who could
    /// neither create nor map them.
    pub fn attach_all() -> Self {
        let privileged = nix::unistd::getuid().is_root();

        Self::attach_at(NTPD_BASE, NTP_SHM_SEGMENTS, privileged)
    }

    pub fn attach_at(base: i32, units: usize, privileged: bool) -> Self {
        let mut segments = Vec::with_capacity(units);

        for unit in 0..units as i32 {
            // only grab the first two when running as root
            if unit <= 1 && !privileged {
                segments.push(None);
                continue;
            }

            match ShmSegment::attach(base, unit) {
                Ok(segment) => {
                    debug!("attached NTP unit {} as shm id {}", unit, segment.id);
                    segments.push(Some(Arc::new(segment)));
                }
                Err(e) => {
                    error!("unable to attach NTP unit {} ({:?})", unit, e);
                    segments.push(None);
                }
            }
        }

        let in_use = Mutex::new(vec![false; segments.len()]);

        SegmentPool { segments, in_use }
    }

    /// Hand out the first free segment, returned to its initial state.
    pub fn allocate(&self) -> Option<Arc<ShmSegment>> {
        let mut in_use = self.in_use.lock().unwrap();

        for (i, segment) in self.segments.iter().enumerate() {
            if let Some(segment) = segment {
                if !in_use[i] {
                    in_use[i] = true;

                    segment.time().reset();

                    debug!("allocated NTP unit {}", segment.unit);

                    return Some(segment.clone());
                }
            }
        }

        None
    }

    /// Return a segment to the pool.
    ///
    /// Answers false for a segment that is not from this pool or that was
    /// not handed out.
    pub fn free(&self, segment: &Arc<ShmSegment>) -> bool {
        let mut in_use = self.in_use.lock().unwrap();

        for (i, candidate) in self.segments.iter().enumerate() {
            if let Some(candidate) = candidate {
                if Arc::ptr_eq(candidate, segment) && in_use[i] {
                    in_use[i] = false;

                    debug!("freed NTP unit {}", segment.unit);

                    return true;
                }
            }
        }

        false
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.lock().unwrap().iter().filter(|used| **used).count()
    }
}

#[cfg(test)]
impl SegmentPool {
    /// Mark every attached test segment for removal.
    pub(crate) fn remove_all(&self) {
        for segment in self.segments.iter().flatten() {
            unsafe {
                libc::shmctl(segment.id, libc::IPC_RMID, std::ptr::null_mut());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashSet;
    use std::mem;
    use std::thread;

    // Keys nowhere near NTPD_BASE so test segments never collide with a
    // real ntpd.  Each test gets its own range.
    const TEST_BASE: i32 = 0x74696d30;

    #[test]
    fn test_unprivileged_skips_low_units() {
        let pool = SegmentPool::attach_at(TEST_BASE, 4, false);

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        assert_eq!(2, first.unit);
        assert_eq!(3, second.unit);
        assert!(pool.allocate().is_none());
        assert_eq!(2, pool.in_use_count());

        pool.remove_all();
    }

    #[test]
    fn test_allocate_free_cycle() {
        let pool = SegmentPool::attach_at(TEST_BASE + 0x10, 4, true);

        let units: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        assert_eq!(vec![0, 1, 2, 3], units.iter().map(|s| s.unit).collect::<Vec<_>>());
        assert!(pool.allocate().is_none());

        assert!(pool.free(&units[1]));
        assert_eq!(3, pool.in_use_count());

        let again = pool.allocate().unwrap();
        assert_eq!(1, again.unit);

        pool.remove_all();
    }

    #[test]
    fn test_free_rejects_strangers() {
        let pool = SegmentPool::attach_at(TEST_BASE + 0x20, 2, true);

        let segment = pool.allocate().unwrap();

        assert!(pool.free(&segment));
        // already free
        assert!(!pool.free(&segment));

        let stranger = Arc::new(ShmSegment::attach(TEST_BASE + 0x20, 1).unwrap());
        assert!(!pool.free(&stranger));

        pool.remove_all();
    }

    #[test]
    fn test_allocate_resets_segment() {
        let pool = SegmentPool::attach_at(TEST_BASE + 0x30, 2, true);

        let segment = pool.allocate().unwrap();
        segment.time().count.store(7, std::sync::atomic::Ordering::Relaxed);

        assert!(pool.free(&segment));

        let again = pool.allocate().unwrap();

        assert_eq!(0, again.time().count.load(std::sync::atomic::Ordering::Relaxed));
        assert_eq!(1, again.time().mode.load(std::sync::atomic::Ordering::Relaxed));

        pool.remove_all();
    }

    #[test]
    fn test_permissions_by_unit() {
        let pool = SegmentPool::attach_at(TEST_BASE + 0x40, 3, true);

        let modes: Vec<_> = pool
            .segments
            .iter()
            .flatten()
            .map(|segment| {
                let mut ds: libc::shmid_ds = unsafe { mem::zeroed() };

                unsafe {
                    libc::shmctl(segment.id, libc::IPC_STAT, &mut ds);
                }

                ds.shm_perm.mode & 0o777
            })
            .collect();

        assert_eq!(0o600, modes[0]);
        assert_eq!(0o600, modes[1]);
        assert_eq!(0o666, modes[2]);

        pool.remove_all();
    }

    #[test]
    fn test_concurrent_allocate() {
        let pool = Arc::new(SegmentPool::attach_at(TEST_BASE + 0x50, 4, true));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();

                thread::spawn(move || pool.allocate())
            })
            .collect();

        let handed_out: Vec<_> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();

        let units: HashSet<_> = handed_out.iter().map(|s| s.unit).collect();

        assert_eq!(4, handed_out.len());
        assert_eq!(4, units.len());

        for segment in &handed_out {
            assert!(pool.free(segment));
        }

        assert_eq!(0, pool.in_use_count());

        pool.remove_all();
    }
}
