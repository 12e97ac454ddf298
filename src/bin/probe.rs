//! Read-only store visualizer: snapshots the shared frame at the persisted redraw delay

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use image::ExtendedColorType;
use tracing::{info, warn};

use lookout::lifecycle::{read_throttle, shutdown_signal, StopSignal};
use lookout::store::SharedFrameStore;
use lookout::{utils, Config, Frame};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file, shared with the main service
    #[arg(short, long, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,
    /// Directory receiving PNG snapshots
    #[arg(short, long, default_value = "snapshots")]
    out_dir: PathBuf,
    /// Stop after this many snapshots
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    let color = match frame.shape.channels {
        1 => ExtendedColorType::L8,
        4 => ExtendedColorType::Rgba8,
        _ => ExtendedColorType::Rgb8,
    };
    image::save_buffer(path, &frame.data, frame.width(), frame.height(), color)
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

fn snapshot_loop(
    store: &SharedFrameStore,
    config: &Config,
    out_dir: &Path,
    count: Option<u64>,
    stop: &StopSignal,
) -> Result<u64> {
    let mut taken = 0;
    while !stop.is_stopped() && count.map_or(true, |n| taken < n) {
        match store.read() {
            Ok(frame) => {
                let path = out_dir.join(format!("frame-{taken:06}.png"));
                save_png(&frame, &path)?;
                taken += 1;
            }
            Err(err) => warn!("Shared frame unavailable: {}", err),
        }
        let delay = read_throttle(&config.control.throttle_path, config.control.default_delay_secs);
        stop.sleep(Duration::from_secs_f64(delay), Duration::from_millis(50));
    }
    Ok(taken)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    utils::init_tracing("lookout=info,lookout_probe=info");

    let config = Config::load(args.config.as_deref())?;
    let store = SharedFrameStore::open(&config.store.name, config.store_shape())
        .wrap_err_with(|| {
            format!("is the lookout service running? store {:?}", config.store.name)
        })?;
    std::fs::create_dir_all(&args.out_dir)
        .wrap_err_with(|| format!("failed to create {}", args.out_dir.display()))?;
    info!("Attached to {} {}, writing to {}", store.name(), store.shape(), args.out_dir.display());

    let stop = StopSignal::new();
    tokio::spawn(shutdown_signal(stop.clone()));

    let out_dir = args.out_dir;
    let count = args.count;
    let loop_stop = stop.clone();
    let taken = tokio::task::spawn_blocking(move || {
        let taken = snapshot_loop(&store, &config, &out_dir, count, &loop_stop);
        if let Err(err) = store.close() {
            warn!("Failed to detach from store: {}", err);
        }
        taken
    })
    .await??;

    stop.trigger();
    info!("Saved {} snapshots", taken);
    Ok(())
}
