use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed raster geometry: rows, columns and interleaved 8-bit channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameShape {
    pub const fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Bytes needed to hold one frame of this shape
    pub fn nbytes(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    pub fn is_supported(&self) -> bool {
        self.height > 0 && self.width > 0 && matches!(self.channels, 1 | 3 | 4)
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// A decoded 8-bit raster frame.
///
/// Frames are moved or cloned between stages, never shared, so annotation can
/// draw in place without affecting the copy handed to the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Row-major interleaved pixels, RGB order for three channels
    pub data: Vec<u8>,
    pub shape: FrameShape,
    /// Capture sequence number, zero when read back from a store
    pub sequence: u64,
    /// Capture time in seconds since the UNIX epoch
    pub captured_at: f64,
}

impl Frame {
    /// Wrap raw pixels; `None` if the buffer length does not match the shape
    pub fn from_raw(shape: FrameShape, data: Vec<u8>) -> Option<Self> {
        if data.len() != shape.nbytes() {
            return None;
        }
        Some(Self {
            data,
            shape,
            sequence: 0,
            captured_at: 0.0,
        })
    }

    pub fn zeroed(shape: FrameShape) -> Self {
        Self {
            data: vec![0; shape.nbytes()],
            shape,
            sequence: 0,
            captured_at: 0.0,
        }
    }

    /// Fill every pixel with `color`, truncated or padded to the channel count
    pub fn filled(shape: FrameShape, color: [u8; 3]) -> Self {
        let mut frame = Self::zeroed(shape);
        for pixel in frame.data.chunks_exact_mut(shape.channels as usize) {
            write_color(pixel, color);
        }
        frame
    }

    pub fn with_capture(mut self, sequence: u64, captured_at: f64) -> Self {
        self.sequence = sequence;
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.shape.width || y >= self.shape.height {
            return None;
        }
        let c = self.shape.channels as usize;
        let offset = (y as usize * self.shape.width as usize + x as usize) * c;
        self.data.get(offset..offset + c)
    }

    /// Set one pixel, ignoring coordinates outside the raster
    pub fn put_pixel(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.shape.width as i64 || y >= self.shape.height as i64 {
            return;
        }
        let c = self.shape.channels as usize;
        let offset = (y as usize * self.shape.width as usize + x as usize) * c;
        if let Some(pixel) = self.data.get_mut(offset..offset + c) {
            write_color(pixel, color);
        }
    }
}

fn write_color(pixel: &mut [u8], color: [u8; 3]) {
    match pixel.len() {
        // BT.601 luma for single channel rasters
        1 => {
            let [r, g, b] = color.map(u32::from);
            pixel[0] = ((299 * r + 587 * g + 114 * b) / 1000) as u8;
        }
        3 => pixel.copy_from_slice(&color),
        4 => {
            pixel[..3].copy_from_slice(&color);
            pixel[3] = u8::MAX;
        }
        _ => {}
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}
