//! Lookout: capture, detect, overlay, publish to shared memory and MJPEG

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use lookout::capture::{self, VideoSource};
use lookout::detect::NullDetector;
use lookout::lifecycle::{
    console, shutdown_signal, Coordinator, StopSignal, ThrottleFile, ThrottlePersister,
};
use lookout::pipeline;
use lookout::store::SharedFrameStore;
use lookout::stream::{self, AppState, StreamSettings};
use lookout::{utils, Config};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,
    /// HTTP listen address for the MJPEG feed
    #[arg(long)]
    bind: Option<String>,
    /// Capture device path, or "synthetic"
    #[arg(long)]
    source: Option<String>,
    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    utils::init_tracing("lookout=info");

    info!("Lookout launching...");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.stream.bind = bind;
    }
    if let Some(source) = args.source {
        config.capture.device = source;
    }
    if args.no_console {
        config.control.console = false;
    }

    let stop = StopSignal::new();
    let store = Arc::new(
        SharedFrameStore::create(&config.store.name, config.store_shape()).wrap_err_with(|| {
            format!("failed to create shared frame store {:?}", config.store.name)
        })?,
    );
    info!("Publishing {} frames to shared memory {}", store.shape(), store.name());

    let throttle = ThrottleFile::new(&config.control.throttle_path);
    let mut coordinator = Coordinator::new(
        stop.clone(),
        store.clone(),
        throttle.clone(),
        &config.lifecycle,
    );

    let served = run(&config, store, stop, throttle, &mut coordinator).await;
    if let Err(err) = &served {
        error!("Fatal: {:#}", err);
    }

    let pipeline = tokio::task::spawn_blocking(move || coordinator.shutdown()).await?;
    served?;
    pipeline?;
    info!("Lookout shut down cleanly");
    Ok(())
}

/// Start every stage and serve until a signal or a stage sets `stop`
async fn run(
    config: &Config,
    store: Arc<SharedFrameStore>,
    stop: StopSignal,
    throttle: ThrottleFile,
    coordinator: &mut Coordinator,
) -> Result<()> {
    if let Err(err) = throttle.write(config.control.default_delay_secs) {
        warn!("Failed to write {}: {}", throttle.path().display(), err);
    }
    let (throttle_tx, throttle_rx) = flume::unbounded();
    let persister = ThrottlePersister::new(
        throttle,
        throttle_rx,
        Duration::from_millis(config.control.persist_interval_ms),
        stop.clone(),
    );
    coordinator.attach_persister(
        thread::Builder::new()
            .name("lookout-throttle".into())
            .spawn(move || persister.run())?,
    );

    if config.control.console {
        let console_stop = stop.clone();
        // Blocks on stdin, so it is never joined
        thread::Builder::new()
            .name("lookout-console".into())
            .spawn(move || {
                let input = io::stdin().lock();
                if let Err(err) = console::run(input, io::stdout(), console_stop, throttle_tx) {
                    warn!("Console stopped: {}", err);
                }
            })?;
    }

    let source = capture::open_source(&config.capture)
        .wrap_err_with(|| format!("failed to open video source {:?}", config.capture.device))?;
    info!("Using video source: {}", source.name());

    let pipeline = pipeline::spawn(
        source,
        NullDetector::default(),
        store.clone(),
        config,
        stop.clone(),
    )?;
    coordinator.attach_pipeline(pipeline);

    let listener = TcpListener::bind(&config.stream.bind)
        .await
        .wrap_err_with(|| format!("failed to bind {}", config.stream.bind))?;
    let state = AppState::new(store, StreamSettings::from(&config.stream), stop.clone());
    stream::serve(listener, state, shutdown_signal(stop)).await?;
    Ok(())
}
