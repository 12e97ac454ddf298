//! Capture stage: source -> frame slot, batch drain -> overlay -> shared store

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::capture::VideoSource;
use crate::detect::DetectionBatch;
use crate::error::PipelineError;
use crate::lifecycle::StopSignal;
use crate::pipeline::annotate::{Annotator, BoxStyle};
use crate::pipeline::channel::{BatchReceiver, FrameSender, Offer};
use crate::store::SharedFrameStore;
use crate::utils::unix_now;

/// What one capture iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A frame was annotated and written to the store
    Published {
        sequence: u64,
        offer: Offer,
        styles: Vec<BoxStyle>,
    },
    /// The source had no frame; the caller should back off
    Missed,
}

pub struct CaptureLoop<S> {
    source: S,
    frames: FrameSender,
    results: BatchReceiver,
    store: Arc<SharedFrameStore>,
    annotator: Annotator,
    latest: DetectionBatch,
    backoff: Duration,
    misses: u64,
    stop: StopSignal,
}

impl<S: VideoSource> CaptureLoop<S> {
    pub fn new(
        source: S,
        frames: FrameSender,
        results: BatchReceiver,
        store: Arc<SharedFrameStore>,
        annotator: Annotator,
        backoff: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            frames,
            results,
            store,
            annotator,
            latest: DetectionBatch::default(),
            backoff,
            misses: 0,
            stop,
        }
    }

    /// Batch currently drawn on every frame
    pub fn latest_batch(&self) -> &DetectionBatch {
        &self.latest
    }

    /// One iteration: capture, feed the detector, merge results, draw, publish.
    ///
    /// Capture failures are reported as [`StepOutcome::Missed`]; only a store
    /// failure is an error.
    #[instrument(level = "trace", skip(self))]
    pub fn step(&mut self) -> Result<StepOutcome, PipelineError> {
        let mut frame = match self.source.capture_frame() {
            Ok(frame) => frame,
            Err(err) => {
                if self.misses == 0 {
                    warn!("Frame grab failed on {}: {}", self.source.name(), err);
                } else {
                    debug!("Frame grab failed ({} in a row): {}", self.misses + 1, err);
                }
                self.misses += 1;
                return Ok(StepOutcome::Missed);
            }
        };
        if self.misses > 0 {
            info!("Capture recovered after {} misses", self.misses);
            self.misses = 0;
        }
        metrics::counter!("lookout_frames_captured_total").increment(1);

        // Detector still busy means this frame is simply not analysed
        let offer = self.frames.offer(frame.clone());
        if offer == Offer::Dropped {
            metrics::counter!("lookout_frames_dropped_total").increment(1);
        }

        if let Some(batch) = self.results.drain_latest() {
            self.latest = batch;
        }

        let styles = self.annotator.annotate(&mut frame, &self.latest, unix_now());

        self.store.write(&frame)?;
        metrics::counter!("lookout_frames_published_total").increment(1);

        Ok(StepOutcome::Published {
            sequence: frame.sequence,
            offer,
            styles,
        })
    }

    /// Loop until the stop signal is set. Returns an error only when publishing fails.
    pub fn run(mut self) -> Result<(), PipelineError> {
        info!("Capture loop started on {}", self.source.name());
        while !self.stop.is_stopped() {
            if self.step()? == StepOutcome::Missed {
                std::thread::sleep(self.backoff);
            }
        }
        let stats = self.frames.stats();
        info!(
            "Capture loop stopped ({} frames offered, {} dropped while detector busy)",
            stats.offered, stats.dropped
        );
        Ok(())
    }
}
