use anyhow::Result;

use clap::Parser;

use tracing::info;

use timeship::pps::PpsSource;

/// Watch a PPS device and show every assert edge
#[derive(Parser)]
#[clap(about)]
struct Args {
    /// PPS device path
    #[clap(long, default_value = "/dev/pps0")]
    pub pps_device: String,
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let pps = PpsSource::open(&args.pps_device)?;
    info!("Opened PPS device {}", args.pps_device);

    loop {
        if let Some(sample) = pps.wait_edge(None)? {
            info!(
                "assert {}.{:09} @ {}.{:09} offset {:.9}",
                sample.real_sec,
                sample.real_nsec,
                sample.clock_sec,
                sample.clock_nsec,
                sample.offset()
            );
        }
    }
}
