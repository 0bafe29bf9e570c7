use crate::shm::ShmSample;
use crate::shm::ShmSegment;
use crate::shm::NTPD_BASE;
use crate::ShmSender;

use std::time::Duration;

use tokio::time::sleep;

use tracing::error;
use tracing::trace;

/// A sample observed on one refclock unit.
#[derive(Clone, Debug)]
pub struct ShmUpdate {
    pub device: String,
    pub unit: i32,
    pub sample: ShmSample,
}

pub struct NtpShm {}

impl NtpShm {
    /// Watch `unit` for new samples, labeling each update with `device`.
    pub async fn watch(unit: i32, device: String, tx: ShmSender) {
        tokio::spawn(watch_segment(NTPD_BASE, unit, device, tx));
    }
}

async fn watch_segment(base: i32, unit: i32, device: String, tx: ShmSender) {
    let segment = match ShmSegment::attach(base, unit) {
        Ok(segment) => segment,
        Err(e) => {
            error!("unable to watch NTP unit {} ({:?})", unit, e);
            return;
        }
    };

    let mut last_count = 0;

    loop {
        let sample = match segment.read(last_count) {
            Some(sample) => sample,
            None => {
                sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        last_count = sample.count;

        let update = ShmUpdate {
            device: device.clone(),
            unit,
            sample,
        };

        trace!(
            "detected NTP timestamp on unit {} count {}: {:?}",
            unit,
            last_count,
            update.sample
        );

        if tx.send(update).is_ok() {};

        sleep(Duration::from_millis(1000)).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::shm::DEFAULT_PRECISION;
    use crate::timestamp::Leap;
    use crate::timestamp::TimeSample;

    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const TEST_BASE: i32 = 0x74696d90;

    #[tokio::test]
    async fn test_watch_reports_updates() {
        let writer = ShmSegment::attach(TEST_BASE, 0).unwrap();
        writer.time().reset();

        let (tx, mut rx) = broadcast::channel(5);

        tokio::spawn(watch_segment(TEST_BASE, 0, "test0".to_string(), tx));

        let sample = TimeSample::new(1_660_000_000, 250_000_000, 1_660_000_000, 250_001_000);
        writer.publish(&sample, DEFAULT_PRECISION, Leap::NoWarning);

        let update = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!("test0", update.device);
        assert_eq!(0, update.unit);
        assert_eq!(2, update.sample.count);
        assert_eq!(1_660_000_000, update.sample.clock_sec);
        assert_eq!(250_000_000, update.sample.clock_nsec);
        assert_eq!(250_001_000, update.sample.receive_nsec);

        unsafe {
            libc::shmctl(writer.id, libc::IPC_RMID, std::ptr::null_mut());
        }
    }
}
