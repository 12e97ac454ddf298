use crate::capture::Frame;
use crate::error::DetectError;

/// One detection as reported by the detector, before filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    /// `[x1, y1, x2, y2]` in pixel coordinates
    pub bbox: [f32; 4],
    pub confidence: f32,
}

/// A filtered, timestamped detection ready to be drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub class_id: u32,
    /// Seconds since the UNIX epoch, shared by every box of a batch
    pub timestamp: f64,
}

impl DetectionBox {
    pub fn from_raw(raw: &RawDetection, timestamp: f64) -> Self {
        let [x1, y1, x2, y2] = raw.bbox;
        Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
            confidence: raw.confidence.clamp(0.0, 1.0),
            class_id: raw.class_id,
            timestamp,
        }
    }
}

/// Result of one detector invocation. Replaces any earlier batch wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
    pub boxes: Vec<DetectionBox>,
    /// Sequence number of the frame the batch was computed from
    pub frame_sequence: u64,
}

impl DetectionBatch {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionBox> {
        self.boxes.iter()
    }
}

/// Object detector collaborator.
///
/// Called synchronously from the detection thread only, so implementations
/// need `Send` but not `Sync`.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        (**self).detect(frame)
    }
}

/// Adapts a closure into a [`Detector`]
pub struct FnDetector<F> {
    name: String,
    detect: F,
}

impl<F> FnDetector<F>
where
    F: FnMut(&Frame) -> Result<Vec<RawDetection>, DetectError> + Send,
{
    pub fn new(name: impl Into<String>, detect: F) -> Self {
        Self {
            name: name.into(),
            detect,
        }
    }
}

impl<F> Detector for FnDetector<F>
where
    F: FnMut(&Frame) -> Result<Vec<RawDetection>, DetectError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        (self.detect)(frame)
    }
}
