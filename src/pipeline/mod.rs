//! Capture and detection stages and the channels between them

pub mod annotate;
pub mod capture_loop;
pub mod channel;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::capture::VideoSource;
use crate::detect::{BatchPolicy, DetectionWorker, Detector};
use crate::error::PipelineError;
use crate::lifecycle::StopSignal;
use crate::store::SharedFrameStore;
use crate::Config;

pub use annotate::{box_style, classify_fresh, Annotator, BoxStyle};
pub use capture_loop::{CaptureLoop, StepOutcome};
pub use channel::{batch_channel, frame_slot, ChannelStats, Offer};

type StageHandle = JoinHandle<Result<(), PipelineError>>;

/// Running capture and detection threads
pub struct Pipeline {
    capture: StageHandle,
    detection: StageHandle,
}

/// Run `body` on a named thread. An error or panic escaping it is logged and
/// sets `stop`.
fn spawn_stage<F>(
    stage: &'static str,
    stop: StopSignal,
    body: F,
) -> Result<StageHandle, PipelineError>
where
    F: FnOnce() -> Result<(), PipelineError> + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("lookout-{stage}"))
        .spawn(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Panicked { stage }),
            };
            if let Err(err) = &result {
                error!("{} stage terminated: {}", stage, err);
                stop.trigger();
            }
            result
        })
        .map_err(|source| PipelineError::Spawn { stage, source })
}

/// Wire the stages together and start both threads.
///
/// A fatal error or panic in either stage sets `stop` so the rest of the
/// process shuts down with it.
pub fn spawn<S, D>(
    source: S,
    detector: D,
    store: Arc<SharedFrameStore>,
    config: &Config,
    stop: StopSignal,
) -> Result<Pipeline, PipelineError>
where
    S: VideoSource + 'static,
    D: Detector + 'static,
{
    let (frames_tx, frames_rx) = frame_slot();
    let (results_tx, results_rx) = batch_channel();

    let worker = DetectionWorker::new(
        detector,
        frames_rx,
        results_tx,
        BatchPolicy::new(config.target_classes(), config.detection.max_boxes),
        Duration::from_millis(config.detection.wait_ms),
        stop.clone(),
    );
    let capture = CaptureLoop::new(
        source,
        frames_tx,
        results_rx,
        store,
        Annotator::new(&config.overlay, &config.detection.classes),
        Duration::from_millis(config.capture.retry_backoff_ms),
        stop.clone(),
    );

    let detection = spawn_stage("detection", stop.clone(), move || {
        worker.run();
        Ok(())
    })?;
    let capture = match spawn_stage("capture", stop.clone(), move || capture.run()) {
        Ok(handle) => handle,
        Err(err) => {
            stop.trigger();
            return Err(err);
        }
    };

    Ok(Pipeline { capture, detection })
}

impl Pipeline {
    pub fn is_finished(&self) -> bool {
        self.capture.is_finished() && self.detection.is_finished()
    }

    /// Wait up to `timeout` for both threads, which must already have been
    /// told to stop. Threads still running at the deadline are left detached.
    pub fn join(self, timeout: Duration) -> Result<(), PipelineError> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !self.is_finished() {
            warn!("Pipeline threads still running after {:?}, detaching", timeout);
            return Ok(());
        }

        let detection = self
            .detection
            .join()
            .unwrap_or(Err(PipelineError::Panicked { stage: "detection" }));
        let capture = self
            .capture
            .join()
            .unwrap_or(Err(PipelineError::Panicked { stage: "capture" }));
        capture.and(detection)
    }
}
