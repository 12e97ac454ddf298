//! Paced MJPEG chunk generator over the shared frame store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, error, info, warn};

use crate::capture::Frame;
use crate::error::{EncodeError, StoreError, StreamError};
use crate::lifecycle::StopSignal;
use crate::store::SharedFrameStore;
use crate::StreamConfig;

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Longest single sleep between stop checks
const POLL_INTERVAL: Duration = Duration::from_millis(5);

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Minimum time between two emitted chunks
    pub send_interval: Duration,
    /// Wait after the store could not be read
    pub idle_wait: Duration,
    pub jpeg_quality: u8,
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            send_interval: Duration::from_millis(config.send_interval_ms),
            idle_wait: Duration::from_millis(config.idle_wait_ms),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Encode a frame as baseline JPEG. Alpha is discarded.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let (pixels, color) = match frame.shape.channels {
        1 => (frame.data.clone(), ExtendedColorType::L8),
        3 => (frame.data.clone(), ExtendedColorType::Rgb8),
        4 => (
            frame
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2]])
                .collect(),
            ExtendedColorType::Rgb8,
        ),
        _ => return Err(EncodeError::UnsupportedShape(frame.shape)),
    };
    let mut jpeg = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode(
        &pixels,
        frame.width(),
        frame.height(),
        color,
    )?;
    Ok(jpeg)
}

/// Wrap one JPEG image as a multipart part
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut chunk = BytesMut::with_capacity(jpeg.len() + 64);
    chunk.put_slice(b"--");
    chunk.put_slice(BOUNDARY.as_bytes());
    chunk.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Enforces a minimum interval between ticks
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Time left before the next tick may run, `None` if it may run now
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.interval).then(|| self.interval - elapsed)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

enum Tick {
    Chunk(Vec<u8>),
    Unavailable(StoreError),
    EncodeFailed(EncodeError),
}

/// One client's cursor over the store.
///
/// Each HTTP client gets its own generator, so pacing and failures are per client.
pub struct StreamGenerator {
    store: Arc<SharedFrameStore>,
    settings: StreamSettings,
    pacer: Pacer,
    stop: StopSignal,
    client: u64,
    sent: u64,
    unavailable: u64,
}

impl StreamGenerator {
    pub fn new(store: Arc<SharedFrameStore>, settings: StreamSettings, stop: StopSignal) -> Self {
        let client = NEXT_CLIENT.fetch_add(1, Ordering::Relaxed);
        info!("Client {} connected to video feed", client);
        Self {
            store,
            pacer: Pacer::new(settings.send_interval),
            settings,
            stop,
            client,
            sent: 0,
            unavailable: 0,
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client
    }

    /// Produce the next multipart chunk, waiting out the send interval first.
    ///
    /// Returns `Ok(None)` once the stop signal is set. An `Err` ends this
    /// client's stream only.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        loop {
            if self.stop.is_stopped() {
                return Ok(None);
            }
            let now = Instant::now();
            if let Some(wait) = self.pacer.remaining(now) {
                tokio::time::sleep(wait.min(POLL_INTERVAL)).await;
                continue;
            }

            let store = self.store.clone();
            let quality = self.settings.jpeg_quality;
            // Lock, copy and encode off the async workers
            let tick = tokio::task::spawn_blocking(move || match store.read() {
                Ok(frame) => match encode_jpeg(&frame, quality) {
                    Ok(jpeg) => Tick::Chunk(jpeg),
                    Err(err) => Tick::EncodeFailed(err),
                },
                Err(err) => Tick::Unavailable(err),
            })
            .await?;

            match tick {
                Tick::Chunk(jpeg) => {
                    self.pacer.mark(now);
                    self.sent += 1;
                    self.unavailable = 0;
                    metrics::counter!("lookout_stream_chunks_total").increment(1);
                    return Ok(Some(multipart_chunk(&jpeg)));
                }
                Tick::Unavailable(err) => {
                    if self.unavailable == 0 {
                        warn!("No frame in shared buffer for client {}: {}", self.client, err);
                    }
                    self.unavailable += 1;
                    tokio::time::sleep(self.settings.idle_wait).await;
                }
                Tick::EncodeFailed(err) => {
                    error!("Failed to encode frame for client {}: {}", self.client, err);
                    self.pacer.mark(now);
                }
            }
        }
    }

    /// Turn the generator into a body stream that ends on stop or first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        let mut generator = self;
        async_stream::stream! {
            loop {
                match generator.next_chunk().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        error!("Stream for client {} failed: {}", generator.client, err);
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for StreamGenerator {
    fn drop(&mut self) {
        debug!("Client {} stream closed after {} chunks", self.client, self.sent);
    }
}
