pub mod ioctl;

mod capture;

pub use capture::Disposition;
pub use capture::PpsTask;
pub use capture::FETCH_TIMEOUT_SEC;
pub use capture::PPS_MIN_FIXES;

use crate::timestamp::TimeSample;

use anyhow::Context;
use anyhow::Result;

use libc::c_int;

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::time::SystemTime;

use thiserror::Error;

use tracing::debug;
use tracing::trace;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot capture assert events for PPS device {0}")]
    CannotCaptureAssert(String),
    #[error("cannot get parameters for PPS device {0}")]
    CannotGetParameters(String, #[source] nix::Error),
    #[error("cannot set parameters for PPS device {0}")]
    CannotSetParameters(String, #[source] nix::Error),
    #[error("{0} cannot wait for PPS events")]
    CannotWait(String),
    #[error("unable to get capabilities of PPS device {0}")]
    CapabilitiesFailed(String, #[source] nix::Error),
}

/// An RFC 2783 pulse-per-second character device, configured to capture
/// assert edges.
#[derive(Debug)]
pub struct PpsSource {
    pub name: String,
    // Don't let the File go out of scope
    file: File,
}

impl PpsSource {
    pub fn open(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(name)
            .with_context(|| format!("Unable to open PPS device {}", name))?;

        let fd = file.as_raw_fd();
        debug!("Opened PPS {} as fd ({})", name, fd);

        configure(fd, name)?;

        Ok(PpsSource {
            name: name.to_string(),
            file,
        })
    }

    pub fn fd(&self) -> c_int {
        self.file.as_raw_fd()
    }

    /// Block until the next assert edge.
    ///
    /// With a timeout the wait is bounded and expiry or interruption comes
    /// back as `None`, so callers get a chance to notice shutdown between
    /// edges.  Without one the wait is forever.
    pub fn wait_edge(&self, timeout_sec: Option<i64>) -> Result<Option<TimeSample>> {
        let mut data = ioctl::data::default();

        match timeout_sec {
            Some(sec) => data.timeout.sec = sec,
            None => data.timeout.flags = ioctl::TIME_INVALID,
        }

        let data_ptr: *mut ioctl::data = &mut data;
        let fetched;

        trace!("Waiting for PPS signal for fd {}", self.fd());

        unsafe {
            fetched = ioctl::fetch(self.fd(), data_ptr);
        }

        match fetched {
            Ok(_) => {}
            Err(nix::errno::Errno::ETIMEDOUT) | Err(nix::errno::Errno::EINTR) => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("unable to get PPS event from fd {}", self.fd()))
            }
        }

        trace!("Received PPS signal from fd {}", self.fd());

        let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;

        Ok(Some(TimeSample::from_pps_time(&data, now)))
    }
}

fn configure(pps_fd: c_int, name: &str) -> Result<()> {
    unsafe {
        let mut mode = 0;

        if let Err(e) = ioctl::getcap(pps_fd, &mut mode) {
            return Err(Error::CapabilitiesFailed(name.to_string(), e).into());
        };
        let mode = ioctl::Mode::from_bits_truncate(mode);
        trace!("PPS {} capabilities: {:?}", name, mode);

        if !mode.contains(ioctl::Mode::CANWAIT) {
            return Err(Error::CannotWait(name.to_string()).into());
        };
        trace!("PPS {} can wait", name);

        if !mode.contains(ioctl::Mode::CAPTUREASSERT) {
            return Err(Error::CannotCaptureAssert(name.to_string()).into());
        };
        trace!("PPS {} can capture assert", name);

        let mut params = ioctl::params::default();

        if let Err(e) = ioctl::getparams(pps_fd, &mut params) {
            return Err(Error::CannotGetParameters(name.to_string(), e).into());
        };
        trace!("PPS {} params: {:?}", name, params);

        params.mode |= ioctl::Mode::CAPTUREASSERT.bits();

        if let Err(e) = ioctl::setparams(pps_fd, &mut params) {
            return Err(Error::CannotSetParameters(name.to_string(), e).into());
        };
        trace!("Set PPS {} params {:?}", name, params);
    }

    trace!("PPS {} configured", name);
    Ok(())
}
