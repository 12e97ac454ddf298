//! V4L2 capture device source

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decoder;
use crate::capture::frame::{Frame, FrameShape, PixelFormat};
use crate::capture::source::VideoSource;
use crate::error::CaptureError;
use crate::utils::unix_now;
use crate::CaptureConfig;

/// Memory-mapped V4L2 capture decoding to RGB24
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    sequence: u64,
}

fn device_err(err: std::io::Error) -> CaptureError {
    CaptureError::Device(err.to_string())
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device).map_err(device_err)?;

        let caps = device.query_caps().map_err(device_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Device(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format().map_err(device_err)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        };
        let applied = device.set_format(&fmt).map_err(device_err)?;
        if applied.width != config.width || applied.height != config.height {
            // Frames are resized again when published, so this only costs quality
            warn!(
                "Device negotiated {}x{} instead of {}x{}",
                applied.width, applied.height, config.width, config.height
            );
        }

        let mut config = config;
        config.width = applied.width;
        config.height = applied.height;

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            sequence: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)
                .map_err(device_err)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }
}

impl VideoSource for V4l2Capture {
    fn name(&self) -> &str {
        &self.config.device
    }

    #[instrument(skip(self), fields(device = %self.config.device))]
    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Device("stream not started".into()))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let captured_at = unix_now();

        let rgb = decoder::decode_frame(
            &buf[..used],
            self.config.format,
            self.config.width,
            self.config.height,
        )?;

        self.sequence += 1;
        let shape = FrameShape::new(self.config.height, self.config.width, 3);
        let frame = Frame::from_raw(shape, rgb)
            .ok_or_else(|| CaptureError::Decode("decoded size mismatch".into()))?;
        Ok(frame.with_capture(self.sequence, captured_at))
    }
}
