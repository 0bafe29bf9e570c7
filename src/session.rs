use crate::chrony;
use crate::configuration::DeviceConfig;
use crate::context::TimeContext;
use crate::pps::Disposition;
use crate::pps::PpsSource;
use crate::pps::PpsTask;
use crate::pps::PPS_MIN_FIXES;
use crate::shm::ShmSegment;
use crate::shm::DEFAULT_PRECISION;
use crate::shm::PPS_PRECISION;
use crate::timestamp::TimeSample;

use serde::Deserialize;

use std::os::unix::net::UnixDatagram;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

/// How a device is connected, which decides whether it can carry a PPS
/// line and whether it talks to the time daemons at all.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Unknown,
    Rs232,
    Usb,
    Bluetooth,
    Pty,
    Tcp,
    Udp,
}

impl SourceType {
    /// Guess the source type from the device path.
    pub fn classify(device: &str) -> Self {
        if device.starts_with("tcp://") {
            SourceType::Tcp
        } else if device.starts_with("udp://") {
            SourceType::Udp
        } else if device.starts_with("/dev/pts") {
            SourceType::Pty
        } else if device.starts_with("/dev/ttyUSB") || device.starts_with("/dev/ttyACM") {
            SourceType::Usb
        } else if device.starts_with("/dev/ttyAMA") || device.starts_with("/dev/ttyS") {
            SourceType::Rs232
        } else if device.starts_with("/dev/rfcomm") {
            SourceType::Bluetooth
        } else {
            SourceType::Unknown
        }
    }

    /// Only directly attached serial receivers have a usable PPS line.
    pub fn pps_capable(&self) -> bool {
        matches!(self, SourceType::Usb | SourceType::Rs232)
    }
}

/// One time source and the daemon-facing resources it holds while active.
pub struct DeviceSession {
    context: Arc<TimeContext>,
    pub device: String,
    pub sourcetype: SourceType,
    pps_device: Option<String>,
    ship_to_ntpd: bool,
    fixcnt: AtomicU32,
    shm_clock: Mutex<Option<Arc<ShmSegment>>>,
    shm_pps: Mutex<Option<Arc<ShmSegment>>>,
    chrony: Mutex<Option<UnixDatagram>>,
    pps_task: Mutex<Option<PpsTask>>,
}

impl DeviceSession {
    pub fn new(context: Arc<TimeContext>, config: &DeviceConfig) -> Arc<Self> {
        let sourcetype = config
            .source
            .unwrap_or_else(|| SourceType::classify(&config.device));

        Arc::new(DeviceSession {
            context,
            device: config.device.clone(),
            sourcetype,
            pps_device: config.pps.as_ref().map(|pps| pps.device.clone()),
            ship_to_ntpd: config.ship_to_ntpd.unwrap_or(true),
            fixcnt: AtomicU32::new(0),
            shm_clock: Mutex::new(None),
            shm_pps: Mutex::new(None),
            chrony: Mutex::new(None),
            pps_task: Mutex::new(None),
        })
    }

    /// Take daemon-facing resources for this device.
    ///
    /// Every source gets a segment for coarse in-band time.  Serial
    /// sources also get a segment for 1PPS transitions, a chrony socket if
    /// one is listening, and a capture task on the configured PPS device.
    pub fn activate(self: &Arc<Self>) {
        // a pty means the test harness, don't talk to the time daemons
        if self.sourcetype == SourceType::Pty {
            return;
        }

        self.fixcnt.store(0, Ordering::Relaxed);

        let clock = match self.context.pool().allocate() {
            Some(segment) => segment,
            None => {
                info!("no NTP unit free for {}", self.device);
                return;
            }
        };

        debug!("{} clock on NTP unit {}", self.device, clock.unit);
        *self.shm_clock.lock().unwrap() = Some(clock);

        if !self.sourcetype.pps_capable() {
            return;
        }

        let pps = match self.context.pool().allocate() {
            Some(segment) => segment,
            None => {
                info!("no NTP unit free for {} 1PPS", self.device);
                return;
            }
        };

        debug!("{} 1PPS on NTP unit {}", self.device, pps.unit);
        *self.shm_pps.lock().unwrap() = Some(pps);

        *self.chrony.lock().unwrap() = chrony::connect(&self.device);

        match &self.pps_device {
            Some(name) => match PpsSource::open(name) {
                Ok(source) => {
                    *self.pps_task.lock().unwrap() = Some(PpsTask::spawn(source, Arc::clone(self)));
                }
                Err(e) => {
                    // coarse time still flows, the segment is returned at
                    // deactivate
                    error!("unable to start PPS capture for {} ({:?})", self.device, e);
                }
            },
            None => debug!("{} has no PPS device configured", self.device),
        }
    }

    /// Give back everything activate took.
    ///
    /// The capture task is joined before the PPS segment goes back to the
    /// pool, so no stray publish can land on a segment the next session
    /// picks up.
    pub async fn deactivate(&self) {
        if let Some(clock) = self.shm_clock.lock().unwrap().take() {
            self.context.pool().free(&clock);
        }

        let task = self.pps_task.lock().unwrap().take();

        if let Some(task) = task {
            task.shutdown().await;
        }

        if let Some(pps) = self.shm_pps.lock().unwrap().take() {
            self.context.pool().free(&pps);
        }

        // the capture task normally closes this on its way out
        self.wrap_pps();
    }

    /// Count a good fix decoded from the in-band stream.
    pub fn record_fix(&self) {
        self.fixcnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fix_count(&self) -> u32 {
        self.fixcnt.load(Ordering::Relaxed)
    }

    /// Ship coarse in-band time to the clock segment.
    pub fn ship_clock(&self, ts: &TimeSample) {
        if !self.ship_to_ntpd {
            return;
        }

        match self.shm_clock.lock().unwrap().as_ref() {
            Some(segment) => segment.publish(ts, DEFAULT_PRECISION, self.context.leap()),
            None => trace!("NTPD missing shm for {}", self.device),
        }
    }

    /// Ship a PPS edge to chrony and to the PPS segment.
    ///
    /// Edges count for nothing until the in-band stream has delivered more
    /// than [`PPS_MIN_FIXES`] fixes, otherwise time may be inaccurate.
    pub fn report_pps(&self, ts: &TimeSample) -> Disposition {
        if !self.ship_to_ntpd {
            return Disposition::Skipped;
        }

        if self.fix_count() <= PPS_MIN_FIXES {
            return Disposition::NoFix;
        }

        let mut disposition = Disposition::Accepted;

        if let Some(socket) = self.chrony.lock().unwrap().as_ref() {
            chrony::send(socket, ts, self.context.leap());
            disposition = Disposition::AcceptedChrony;
        }

        if let Some(segment) = self.shm_pps.lock().unwrap().as_ref() {
            segment.publish(ts, PPS_PRECISION, self.context.leap());
        }

        disposition
    }

    /// Drop the chrony socket once the capture task is done with it.
    pub(crate) fn wrap_pps(&self) {
        if self.chrony.lock().unwrap().take().is_some() {
            debug!("closed chrony socket for {}", self.device);
        }
    }
}
