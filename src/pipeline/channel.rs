//! Typed channels between pipeline stages.
//!
//! | channel | capacity | producer | consumer |
//! |---|---|---|---|
//! | frames (capture -> detect) | 1 | drop-newest-if-busy, never blocks | bounded wait |
//! | batches (detect -> capture) | unbounded | never blocks | drain-to-latest |

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::capture::Frame;
use crate::detect::DetectionBatch;

/// Frame slot depth. The detector works on at most one pending frame.
pub const FRAME_SLOT_CAPACITY: usize = 1;

#[derive(Default)]
struct Stats {
    offered: AtomicUsize,
    forwarded: AtomicUsize,
    dropped: AtomicUsize,
}

/// Snapshot of channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Items handed to the channel by the producer
    pub offered: usize,
    /// Items that reached (or will reach) the consumer
    pub forwarded: usize,
    /// Items discarded by the channel policy
    pub dropped: usize,
}

impl Stats {
    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            offered: self.offered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a non-blocking frame offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// A frame is already pending; the offered one was discarded
    Dropped,
    /// The detection side has gone away
    Closed,
}

/// Result of a bounded wait for a frame
#[derive(Debug)]
pub enum Recv {
    Frame(Frame),
    Timeout,
    Closed,
}

/// Create the depth-1 capture -> detection frame slot
pub fn frame_slot() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = flume::bounded(FRAME_SLOT_CAPACITY);
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        FrameSender {
            tx,
            stats: stats.clone(),
        },
        FrameReceiver { rx, stats },
    )
}

#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
    stats: Arc<CachePadded<Stats>>,
}

impl FrameSender {
    /// Producer: hand a frame over without blocking.
    ///
    /// When the slot is occupied the *new* frame is dropped and the pending one
    /// is left untouched.
    pub fn offer(&self, frame: Frame) -> Offer {
        self.stats.offered.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                Offer::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.tx.is_full()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

pub struct FrameReceiver {
    rx: Receiver<Frame>,
    stats: Arc<CachePadded<Stats>>,
}

impl FrameReceiver {
    /// Consumer: wait up to `timeout` for the pending frame
    pub fn recv_timeout(&self, timeout: Duration) -> Recv {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Recv::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Recv::Timeout,
            Err(RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

/// Create the unbounded detection -> capture batch channel
pub fn batch_channel() -> (BatchSender, BatchReceiver) {
    let (tx, rx) = flume::unbounded();
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        BatchSender {
            tx,
            stats: stats.clone(),
        },
        BatchReceiver { rx, stats },
    )
}

#[derive(Clone)]
pub struct BatchSender {
    tx: Sender<DetectionBatch>,
    stats: Arc<CachePadded<Stats>>,
}

impl BatchSender {
    /// Publish a batch; returns false once the capture side has gone away
    pub fn publish(&self, batch: DetectionBatch) -> bool {
        self.stats.offered.fetch_add(1, Ordering::Relaxed);
        self.tx.send(batch).is_ok()
    }
}

pub struct BatchReceiver {
    rx: Receiver<DetectionBatch>,
    stats: Arc<CachePadded<Stats>>,
}

impl BatchReceiver {
    /// Empty the channel and return only the most recent batch, if any arrived
    pub fn drain_latest(&self) -> Option<DetectionBatch> {
        let mut latest = None;
        let mut drained = 0usize;
        for batch in self.rx.try_iter() {
            drained += 1;
            latest = Some(batch);
        }
        if drained > 0 {
            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            self.stats.dropped.fetch_add(drained - 1, Ordering::Relaxed);
        }
        latest
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameShape;

    fn frame(seq: u64) -> Frame {
        Frame::zeroed(FrameShape::new(2, 2, 3)).with_capture(seq, seq as f64)
    }

    #[test]
    fn full_slot_drops_newest_and_keeps_pending() {
        let (tx, rx) = frame_slot();
        assert_eq!(tx.offer(frame(1)), Offer::Accepted);
        assert_eq!(tx.offer(frame(2)), Offer::Dropped);
        assert_eq!(tx.offer(frame(3)), Offer::Dropped);
        assert!(tx.len() <= FRAME_SLOT_CAPACITY);

        match rx.recv_timeout(Duration::from_millis(10)) {
            Recv::Frame(f) => assert_eq!(f.sequence, 1),
            other => panic!("expected pending frame, got {other:?}"),
        }
        assert!(rx.try_recv().is_none());
        assert_eq!(
            tx.stats(),
            ChannelStats {
                offered: 3,
                forwarded: 1,
                dropped: 2
            }
        );
    }

    #[test]
    fn slot_accepts_again_after_consumer_takes_frame() {
        let (tx, rx) = frame_slot();
        assert_eq!(tx.offer(frame(1)), Offer::Accepted);
        assert!(tx.is_busy());
        assert!(rx.try_recv().is_some());
        assert_eq!(tx.offer(frame(2)), Offer::Accepted);
    }

    #[test]
    fn recv_times_out_and_reports_closed() {
        let (tx, rx) = frame_slot();
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)),
            Recv::Timeout
        ));
        drop(tx);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)),
            Recv::Closed
        ));
    }

    #[test]
    fn offer_after_consumer_dropped_is_closed() {
        let (tx, rx) = frame_slot();
        drop(rx);
        assert_eq!(tx.offer(frame(1)), Offer::Closed);
    }

    #[test]
    fn drain_keeps_only_latest_batch() {
        let (tx, rx) = batch_channel();
        assert!(rx.drain_latest().is_none());
        for seq in 1..=3 {
            tx.publish(DetectionBatch {
                boxes: Vec::new(),
                frame_sequence: seq,
            });
        }
        let latest = rx.drain_latest().unwrap();
        assert_eq!(latest.frame_sequence, 3);
        assert!(rx.drain_latest().is_none());
        let stats = rx.stats();
        assert_eq!((stats.offered, stats.forwarded, stats.dropped), (3, 1, 2));
    }
}
