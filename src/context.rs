use crate::shm::SegmentPool;
use crate::timestamp::Leap;

use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

/// State shared by every device session: the refclock segment pool and the
/// leap second warning currently in effect.
pub struct TimeContext {
    pool: SegmentPool,
    leap_notify: AtomicI32,
}

impl TimeContext {
    /// Attach the standard refclock segments and start with no leap
    /// warning.
    ///
    /// Run this early, while the process may still hold the privileges the
    /// root-only units need.
    pub fn new() -> Self {
        Self::with_pool(SegmentPool::attach_all())
    }

    pub fn with_pool(pool: SegmentPool) -> Self {
        TimeContext {
            pool,
            leap_notify: AtomicI32::new(Leap::NoWarning.into()),
        }
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// The leap warning decoded from the most recent ephemeris.
    pub fn leap(&self) -> Leap {
        Leap::from_raw(self.leap_notify.load(Ordering::Relaxed))
    }

    pub fn set_leap(&self, leap: Leap) {
        self.leap_notify.store(leap.into(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_leap_notify() {
        let context = TimeContext::with_pool(SegmentPool::attach_at(0, 0, true));

        assert_eq!(Leap::NoWarning, context.leap());

        context.set_leap(Leap::AddSecond);

        assert_eq!(Leap::AddSecond, context.leap());
    }
}
