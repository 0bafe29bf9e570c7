use chrono::Duration;
use chrono::NaiveDateTime;

use clap::Parser;

use tokio::sync::broadcast;

use tracing::info;

use timeship::shm::NtpShm;
use timeship::shm::NTP_SHM_SEGMENTS;

/// Watch ntpd shared memory refclock segments
#[derive(Parser)]
#[clap(about)]
struct Args {
    /// Number of NTP units to watch, starting at NTP0
    #[clap(long, default_value_t = NTP_SHM_SEGMENTS)]
    pub units: usize,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let (tx, mut rx) = broadcast::channel(5);

    for unit in 0..args.units {
        NtpShm::watch(unit as i32, format!("NTP{}", unit), tx.clone()).await;
    }

    let zero = Duration::seconds(0);

    while let Ok(update) = rx.recv().await {
        let sample = update.sample;

        let reference_time =
            NaiveDateTime::from_timestamp(sample.clock_sec as i64, sample.clock_nsec);
        let received_time =
            NaiveDateTime::from_timestamp(sample.receive_sec as i64, sample.receive_nsec);

        let offset = reference_time.signed_duration_since(received_time);

        let offset_text = if offset > zero {
            format!("{} after ", offset)
        } else {
            format!("{} before", offset * -1)
        };

        info!(
            "{} tick {} received {} system at {}",
            update.device, reference_time, offset_text, received_time
        );
    }
}
