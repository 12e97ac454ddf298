pub mod stub;
pub mod types;
pub mod worker;

pub use stub::NullDetector;
pub use types::{DetectionBatch, DetectionBox, Detector, FnDetector, RawDetection};
pub use worker::{BatchPolicy, DetectionWorker, WorkerPoll};
