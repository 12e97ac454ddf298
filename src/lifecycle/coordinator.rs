//! Ordered shutdown of the whole process

use std::process::Command;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::lifecycle::{StopSignal, ThrottleFile};
use crate::pipeline::Pipeline;
use crate::store::SharedFrameStore;
use crate::LifecycleConfig;

/// Owns everything that must be released when the process exits
pub struct Coordinator {
    stop: StopSignal,
    grace_period: Duration,
    store: Arc<SharedFrameStore>,
    throttle: ThrottleFile,
    on_shutdown: Vec<String>,
    pipeline: Option<Pipeline>,
    persister: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        stop: StopSignal,
        store: Arc<SharedFrameStore>,
        throttle: ThrottleFile,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            stop,
            grace_period: Duration::from_millis(config.grace_period_ms),
            store,
            throttle,
            on_shutdown: config.on_shutdown.clone(),
            pipeline: None,
            persister: None,
        }
    }

    pub fn attach_pipeline(&mut self, pipeline: Pipeline) {
        self.pipeline = Some(pipeline);
    }

    pub fn attach_persister(&mut self, persister: JoinHandle<()>) {
        self.persister = Some(persister);
    }

    /// Stop, wait out the grace period, join the stages, release the store,
    /// remove the throttle file and run the shutdown hook, in that order.
    ///
    /// Cleanup always runs to the end. The returned error is the fatal error
    /// reported by a pipeline stage, if any.
    pub fn shutdown(mut self) -> Result<(), PipelineError> {
        if self.stop.trigger() {
            info!("Shutdown requested");
        }
        std::thread::sleep(self.grace_period);

        let outcome = match self.pipeline.take() {
            Some(pipeline) => pipeline.join(self.grace_period),
            None => Ok(()),
        };
        if let Some(persister) = self.persister.take() {
            let deadline = Instant::now() + self.grace_period;
            while !persister.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if persister.is_finished() && persister.join().is_err() {
                warn!("Throttle persister panicked");
            }
        }

        if let Err(err) = self.store.close() {
            error!("Failed to release shared frame store {}: {}", self.store.name(), err);
        }
        if let Err(err) = self.throttle.remove() {
            error!("Failed to remove {}: {}", self.throttle.path().display(), err);
        }
        run_hook(&self.on_shutdown);

        info!("Shutdown complete");
        outcome
    }
}

/// Run the configured shutdown command; failures are logged only
pub fn run_hook(argv: &[String]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return true;
    };
    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => {
            info!("Shutdown hook {:?} finished", argv);
            true
        }
        Ok(status) => {
            warn!("Shutdown hook {:?} exited with {}", argv, status);
            false
        }
        Err(err) => {
            warn!("Shutdown hook {:?} failed to start: {}", argv, err);
            false
        }
    }
}

/// Resolve on SIGINT, SIGTERM or once `stop` is set elsewhere; sets `stop`
pub async fn shutdown_signal(stop: StopSignal) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
        _ = stop.stopped(Duration::from_millis(50)) => {}
    }
    stop.trigger();
}
