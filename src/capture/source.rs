//! Pull-based frame sources

use std::collections::VecDeque;

use tracing::info;

use crate::capture::frame::{Frame, FrameShape};
use crate::error::CaptureError;
use crate::utils::unix_now;
use crate::CaptureConfig;

/// A video source polled by the capture loop.
///
/// An `Err` means "no frame this time"; the caller backs off and retries.
pub trait VideoSource: Send {
    fn name(&self) -> &str;

    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture_frame()
    }
}

/// Moving gradient test pattern, used when no camera is configured
pub struct SyntheticSource {
    shape: FrameShape,
    sequence: u64,
    interval: std::time::Duration,
    last: Option<std::time::Instant>,
}

impl SyntheticSource {
    pub fn new(shape: FrameShape, fps: u32) -> Self {
        Self {
            shape,
            sequence: 0,
            interval: std::time::Duration::from_secs(1) / fps.max(1),
            last: None,
        }
    }

    fn render(&self) -> Frame {
        let FrameShape {
            height,
            width,
            channels,
        } = self.shape;
        let mut frame = Frame::zeroed(self.shape);
        let shift = ((self.sequence * 4) % width as u64) as u32;
        for y in 0..height {
            for x in 0..width {
                let r = (((x + shift) % width) * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                let b = (self.sequence % 256) as u8;
                frame.put_pixel(x as i64, y as i64, [r, g, b]);
            }
        }
        debug_assert_eq!(frame.data.len(), (height * width * channels) as usize);
        frame
    }
}

impl VideoSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        // Pace to the configured rate like a real device would
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(std::time::Instant::now());
        self.sequence += 1;
        Ok(self.render().with_capture(self.sequence, unix_now()))
    }
}

/// Replays a fixed list of frames, then reports `Exhausted` on every call
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    sequence: u64,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            sequence: 0,
        }
    }
}

impl VideoSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let frame = self.frames.pop_front().ok_or(CaptureError::Exhausted)?;
        self.sequence += 1;
        Ok(frame.with_capture(self.sequence, unix_now()))
    }
}

/// Open the source named by `config.device`
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn VideoSource>, CaptureError> {
    let shape = FrameShape::new(config.height, config.width, 3);
    match config.device.as_str() {
        "synthetic" => {
            info!("Using synthetic test pattern source {}", shape);
            Ok(Box::new(SyntheticSource::new(shape, config.fps)))
        }
        #[cfg(feature = "v4l2")]
        _ => {
            let mut capture = crate::capture::V4l2Capture::new(config.clone())?;
            capture.start_stream()?;
            Ok(Box::new(capture))
        }
        #[cfg(not(feature = "v4l2"))]
        other => Err(CaptureError::Device(format!(
            "device {other:?} requires the `v4l2` feature"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_have_configured_shape() {
        let shape = FrameShape::new(12, 16, 3);
        let mut source = SyntheticSource::new(shape, 1000);
        let first = source.capture_frame().unwrap();
        let second = source.capture_frame().unwrap();
        assert_eq!(first.shape, shape);
        assert_eq!(first.data.len(), shape.nbytes());
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_ne!(first.data, second.data);
        assert!(second.captured_at >= first.captured_at);
    }

    #[test]
    fn scripted_source_runs_dry() {
        let shape = FrameShape::new(1, 1, 3);
        let mut source = ScriptedSource::new([Frame::zeroed(shape)]);
        assert!(source.capture_frame().is_ok());
        assert!(matches!(
            source.capture_frame(),
            Err(CaptureError::Exhausted)
        ));
    }

    #[test]
    fn unknown_device_without_v4l2_is_rejected() {
        let config = CaptureConfig {
            device: "/dev/video9".into(),
            ..CaptureConfig::default()
        };
        if cfg!(not(feature = "v4l2")) {
            assert!(matches!(open_source(&config), Err(CaptureError::Device(_))));
        }
    }
}
