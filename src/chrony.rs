use crate::timestamp::Leap;
use crate::timestamp::TimeSample;

use std::mem;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::path::PathBuf;
use std::slice;

use tracing::debug;
use tracing::trace;
use tracing::warn;

/// Value chrony requires in [`SockSample::magic`].
pub const SOCK_MAGIC: i32 = 0x534f434b;

/// The raw nanosecond difference behind [`TimeSample::offset`] is only
/// trustworthy within a few seconds.  Larger offsets are still shipped,
/// chrony does its own sanity filtering, but they are worth a warning.
pub const OFFSET_SANE: f64 = 2.0;

/// One datagram of chrony's SOCK refclock protocol.
///
/// `tv` carries the system clock reading for the pulse and `offset` the
/// seconds of reference time it implies, so chrony gets nanosecond
/// resolution instead of the microseconds an ntpd segment can carry.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct SockSample {
    pub tv_sec: libc::time_t,
    pub tv_usec: libc::suseconds_t,
    pub offset: f64,
    pub pulse: i32,
    pub leap: i32,
    _pad: i32,
    pub magic: i32,
}

impl SockSample {
    pub fn new(ts: &TimeSample, leap: Leap) -> Self {
        SockSample {
            tv_sec: ts.clock_sec as libc::time_t,
            tv_usec: (ts.clock_nsec / 1000) as libc::suseconds_t,
            offset: ts.offset(),
            pulse: 0,
            leap: leap.into(),
            _pad: 0,
            magic: SOCK_MAGIC,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(
                self as *const SockSample as *const u8,
                mem::size_of::<SockSample>(),
            )
        }
    }
}

/// Where chrony listens for samples about `device`.
///
/// Only root can use /var/run, so unprivileged processes look in /tmp
/// instead.
pub fn socket_path(device: &str, privileged: bool) -> PathBuf {
    let base = Path::new(device)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.to_string());

    if privileged {
        PathBuf::from(format!("/var/run/chrony.{}.sock", base))
    } else {
        PathBuf::from(format!("/tmp/chrony.{}.sock", base))
    }
}

pub fn connect(device: &str) -> Option<UnixDatagram> {
    let path = socket_path(device, nix::unistd::getuid().is_root());

    connect_at(&path)
}

/// Connect to a chrony SOCK refclock socket.
///
/// A missing socket just means chrony is not configured for this device,
/// so every failure here is quiet.
pub fn connect_at(path: &Path) -> Option<UnixDatagram> {
    if !path.exists() {
        debug!("chrony socket {} doesn't exist", path.display());
        return None;
    }

    let socket = match UnixDatagram::unbound() {
        Ok(socket) => socket,
        Err(e) => {
            debug!("unable to create chrony socket ({:?})", e);
            return None;
        }
    };

    match socket.connect(path) {
        Ok(()) => {
            trace!("using chrony socket {}", path.display());
            Some(socket)
        }
        Err(e) => {
            debug!("connect chrony socket {} failed ({:?})", path.display(), e);
            None
        }
    }
}

pub fn send(socket: &UnixDatagram, ts: &TimeSample, leap: Leap) {
    let sample = SockSample::new(ts, leap);

    if sample.offset.abs() > OFFSET_SANE {
        warn!("chrony offset {:.9} is beyond sane bounds", sample.offset);
    }

    trace!(
        "chrony send {}.{:09} @ {}.{:09} offset {:.9}",
        ts.real_sec,
        ts.real_nsec,
        ts.clock_sec,
        ts.clock_nsec,
        sample.offset
    );

    if let Err(e) = socket.send(sample.as_bytes()) {
        debug!("chrony send failed ({:?})", e);
    }
}
