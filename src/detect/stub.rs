use tracing::warn;

use crate::capture::Frame;
use crate::detect::types::{Detector, RawDetection};
use crate::error::DetectError;

/// Detector that never finds anything.
///
/// Lets the pipeline run end to end without a model; frames are still
/// captured, published and streamed.
#[derive(Debug, Default)]
pub struct NullDetector {
    warned: bool,
}

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        if !self.warned {
            warn!("No detection backend configured, overlays will stay empty");
            self.warned = true;
        }
        Ok(Vec::new())
    }
}
