//! Detection stage: frame slot -> detector -> batch channel

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::capture::Frame;
use crate::detect::types::{DetectionBatch, DetectionBox, Detector, RawDetection};
use crate::error::DetectError;
use crate::lifecycle::StopSignal;
use crate::pipeline::channel::{BatchSender, FrameReceiver, Recv};
use crate::utils::unix_now;

/// Class filter and truncation applied to raw detector output
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub target_classes: HashSet<u32>,
    pub max_boxes: usize,
}

impl BatchPolicy {
    pub fn new(target_classes: impl IntoIterator<Item = u32>, max_boxes: usize) -> Self {
        Self {
            target_classes: target_classes.into_iter().collect(),
            max_boxes,
        }
    }

    /// Keep target classes in detector order, truncate, and stamp every box
    /// with the same `timestamp`
    pub fn build(
        &self,
        raw: &[RawDetection],
        frame_sequence: u64,
        timestamp: f64,
    ) -> DetectionBatch {
        let boxes = raw
            .iter()
            .filter(|d| self.target_classes.contains(&d.class_id))
            .take(self.max_boxes)
            .map(|d| DetectionBox::from_raw(d, timestamp))
            .collect();
        DetectionBatch {
            boxes,
            frame_sequence,
        }
    }
}

/// What one poll of the worker did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoll {
    /// No frame arrived within the wait bound
    Idle,
    /// A batch with this many boxes was published
    Published(usize),
    /// The detector failed on this frame; nothing was published
    Failed,
    /// The capture side closed the frame slot
    Closed,
}

pub struct DetectionWorker<D> {
    detector: D,
    frames: FrameReceiver,
    results: BatchSender,
    policy: BatchPolicy,
    wait: Duration,
    stop: StopSignal,
}

impl<D: Detector> DetectionWorker<D> {
    pub fn new(
        detector: D,
        frames: FrameReceiver,
        results: BatchSender,
        policy: BatchPolicy,
        wait: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            detector,
            frames,
            results,
            policy,
            wait,
            stop,
        }
    }

    /// Run the detector on one frame and build its batch, without publishing.
    ///
    /// The batch timestamp is taken once, after the detector returns, and is
    /// never earlier than the frame's capture time.
    /// A detector that panics is reported as [`DetectError::Backend`] for this
    /// frame only.
    pub fn process(&mut self, frame: &Frame) -> Result<DetectionBatch, DetectError> {
        let detector = &mut self.detector;
        let raw = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)))
            .map_err(|payload| DetectError::Backend(panic_message(payload.as_ref())))??;
        let timestamp = unix_now().max(frame.captured_at);
        Ok(self.policy.build(&raw, frame.sequence, timestamp))
    }

    /// Wait for one frame and, if one arrives, detect and publish.
    ///
    /// Detector errors are logged and discarded here; the frame is not retried.
    #[instrument(level = "trace", skip(self))]
    pub fn poll_once(&mut self) -> WorkerPoll {
        let frame = match self.frames.recv_timeout(self.wait) {
            Recv::Frame(frame) => frame,
            Recv::Timeout => return WorkerPoll::Idle,
            Recv::Closed => return WorkerPoll::Closed,
        };

        match self.process(&frame) {
            Ok(batch) => {
                let count = batch.len();
                debug!("Frame {} produced {} boxes", frame.sequence, count);
                metrics::counter!("lookout_detections_total").increment(count as u64);
                if !self.results.publish(batch) {
                    return WorkerPoll::Closed;
                }
                WorkerPoll::Published(count)
            }
            Err(err) => {
                warn!("Detection error on frame {}: {}", frame.sequence, err);
                metrics::counter!("lookout_detection_errors_total").increment(1);
                WorkerPoll::Failed
            }
        }
    }

    /// Loop until the stop signal is set or the capture side goes away
    pub fn run(mut self) {
        info!("Detection worker started ({})", self.detector.name());
        while !self.stop.is_stopped() {
            if self.poll_once() == WorkerPoll::Closed {
                debug!("Frame slot closed");
                break;
            }
        }
        info!("Detection worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown payload".into());
    format!("detector panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameShape;
    use crate::detect::types::FnDetector;
    use crate::pipeline::channel::{batch_channel, frame_slot};
    use std::time::Instant;

    fn raw(class_id: u32, confidence: f32) -> RawDetection {
        RawDetection {
            class_id,
            bbox: [1.7, 2.2, 10.9, 12.0],
            confidence,
        }
    }

    fn frame(seq: u64, captured_at: f64) -> Frame {
        Frame::zeroed(FrameShape::new(4, 4, 3)).with_capture(seq, captured_at)
    }

    #[test]
    fn policy_filters_then_truncates_in_order() {
        let policy = BatchPolicy::new([0, 2], 2);
        let input = [raw(1, 0.9), raw(0, 0.8), raw(2, 0.7), raw(0, 0.6), raw(2, 0.5)];
        let batch = policy.build(&input, 7, 42.0);

        assert_eq!(batch.frame_sequence, 7);
        let confidences: Vec<f32> = batch.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.8, 0.7]);
        assert!(batch.iter().all(|b| b.timestamp == 42.0));
        assert_eq!(
            (batch.boxes[0].x1, batch.boxes[0].y1, batch.boxes[0].x2, batch.boxes[0].y2),
            (1, 2, 10, 12)
        );
    }

    #[test]
    fn batch_length_is_min_of_filtered_and_max_boxes() {
        for max_boxes in 0..6 {
            for n in 0..8usize {
                let input: Vec<RawDetection> =
                    (0..n).map(|i| raw((i % 2) as u32, 0.5)).collect();
                let filtered = input.iter().filter(|d| d.class_id == 0).count();
                let batch = BatchPolicy::new([0], max_boxes).build(&input, 0, 0.0);
                assert_eq!(batch.len(), filtered.min(max_boxes));
            }
        }
    }

    #[test]
    fn timestamp_never_precedes_capture() {
        let (_tx, frames) = frame_slot();
        let (results, _rx) = batch_channel();
        let detector = FnDetector::new("one", |_: &Frame| Ok(vec![raw(0, 0.9)]));
        let mut worker = DetectionWorker::new(
            detector,
            frames,
            results,
            BatchPolicy::new([0], 5),
            Duration::from_millis(10),
            StopSignal::new(),
        );
        // Capture clock ahead of ours
        let future = unix_now() + 60.0;
        let batch = worker.process(&frame(1, future)).unwrap();
        assert!(batch.boxes[0].timestamp >= future);
    }

    #[test]
    fn detector_error_is_isolated_to_its_frame() {
        let (tx, frames) = frame_slot();
        let (results, rx) = batch_channel();
        let mut calls = 0;
        let detector = FnDetector::new("flaky", move |_: &Frame| {
            calls += 1;
            if calls == 1 {
                Err(DetectError::Backend("boom".into()))
            } else {
                Ok(vec![raw(0, 0.9)])
            }
        });
        let mut worker = DetectionWorker::new(
            detector,
            frames,
            results,
            BatchPolicy::new([0], 5),
            Duration::from_millis(50),
            StopSignal::new(),
        );

        tx.offer(frame(1, unix_now()));
        assert_eq!(worker.poll_once(), WorkerPoll::Failed);
        assert!(rx.drain_latest().is_none());

        tx.offer(frame(2, unix_now()));
        assert_eq!(worker.poll_once(), WorkerPoll::Published(1));
        assert_eq!(rx.drain_latest().unwrap().frame_sequence, 2);
    }

    #[test]
    fn detector_panic_is_isolated_to_its_frame() {
        let (tx, frames) = frame_slot();
        let (results, rx) = batch_channel();
        let mut calls = 0;
        let detector = FnDetector::new("panicky", move |_: &Frame| {
            calls += 1;
            if calls == 1 {
                panic!("model blew up");
            }
            Ok(vec![raw(0, 0.9)])
        });
        let mut worker = DetectionWorker::new(
            detector,
            frames,
            results,
            BatchPolicy::new([0], 5),
            Duration::from_millis(50),
            StopSignal::new(),
        );

        match worker.process(&frame(1, unix_now())) {
            Err(DetectError::Backend(msg)) => assert!(msg.contains("model blew up")),
            other => panic!("expected backend error, got {other:?}"),
        }

        tx.offer(frame(2, unix_now()));
        assert_eq!(worker.poll_once(), WorkerPoll::Published(1));
        assert_eq!(rx.drain_latest().unwrap().frame_sequence, 2);
    }

    #[test]
    fn empty_batches_are_published() {
        let (tx, frames) = frame_slot();
        let (results, rx) = batch_channel();
        let detector = FnDetector::new("none", |_: &Frame| Ok(vec![raw(5, 0.9)]));
        let mut worker = DetectionWorker::new(
            detector,
            frames,
            results,
            BatchPolicy::new([0], 5),
            Duration::from_millis(50),
            StopSignal::new(),
        );
        tx.offer(frame(1, unix_now()));
        assert_eq!(worker.poll_once(), WorkerPoll::Published(0));
        assert!(rx.drain_latest().unwrap().is_empty());
    }

    #[test]
    fn idle_poll_times_out() {
        let (_tx, frames) = frame_slot();
        let (results, _rx) = batch_channel();
        let mut worker = DetectionWorker::new(
            FnDetector::new("none", |_: &Frame| Ok(Vec::new())),
            frames,
            results,
            BatchPolicy::new([0], 5),
            Duration::from_millis(20),
            StopSignal::new(),
        );
        assert_eq!(worker.poll_once(), WorkerPoll::Idle);
    }

    #[test]
    fn run_exits_within_wait_bound_after_stop() {
        let (_tx, frames) = frame_slot();
        let (results, _rx) = batch_channel();
        let stop = StopSignal::new();
        let wait = Duration::from_millis(500);
        let worker = DetectionWorker::new(
            FnDetector::new("none", |_: &Frame| Ok(Vec::new())),
            frames,
            results,
            BatchPolicy::new([0], 5),
            wait,
            stop.clone(),
        );
        let handle = std::thread::spawn(move || worker.run());
        std::thread::sleep(Duration::from_millis(50));

        let stopped_at = Instant::now();
        stop.trigger();
        handle.join().unwrap();
        assert!(stopped_at.elapsed() <= wait + Duration::from_millis(250));
    }
}
