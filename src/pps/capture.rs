use crate::pps::PpsSource;
use crate::session::DeviceSession;

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

/// Seconds one blocking edge fetch may take before the task re-checks for
/// cancellation.
pub const FETCH_TIMEOUT_SEC: i64 = 3;

/// Edges are ignored until this many fixes have been counted.  Some
/// receiver families pulse before their time is accurate, and there is no
/// general way to tell, so every source earns trust the same way.
pub const PPS_MIN_FIXES: u32 = 3;

/// What became of one captured edge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    Skipped,
    NoFix,
    Accepted,
    AcceptedChrony,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Skipped => write!(f, "skipped ship_to_ntp=0"),
            Disposition::NoFix => write!(f, "no fix"),
            Disposition::Accepted => write!(f, "accepted"),
            Disposition::AcceptedChrony => write!(f, "accepted chrony sock"),
        }
    }
}

/// A running edge-capture task feeding one device session.
///
/// The task blocks in the PPS fetch ioctl, so it runs on the blocking
/// thread pool and checks its token between bounded waits.
/// [`shutdown`][PpsTask::shutdown] resolves only once the thread is done,
/// and must complete before the session's PPS segment goes back to the
/// pool.
pub struct PpsTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PpsTask {
    pub fn spawn(pps: PpsSource, session: Arc<DeviceSession>) -> Self {
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || run(pps, session, task_cancel));

        PpsTask { cancel, handle }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(e) = self.handle.await {
            error!("PPS capture task panicked ({:?})", e);
        }
    }
}

fn run(pps: PpsSource, session: Arc<DeviceSession>, cancel: CancellationToken) {
    info!("watching PPS device {} for {}", pps.name, session.device);

    while !cancel.is_cancelled() {
        match pps.wait_edge(Some(FETCH_TIMEOUT_SEC)) {
            Ok(Some(sample)) => {
                let disposition = session.report_pps(&sample);

                trace!(
                    "PPS edge on {} at {}.{:09}: {}",
                    pps.name,
                    sample.clock_sec,
                    sample.clock_nsec,
                    disposition
                );
            }
            Ok(None) => continue,
            Err(e) => {
                error!("PPS {} failed ({:?})", pps.name, e);
                break;
            }
        }
    }

    session.wrap_pps();

    debug!("PPS device {} stopped", pps.name);
}
