//! Error types for each pipeline layer

use std::io;

use thiserror::Error;

use crate::capture::FrameShape;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared frame store {0:?} not found")]
    NotFound(String),
    #[error("shared frame store {name:?} holds {actual} bytes, shape needs {expected}")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported frame shape {0}")]
    UnsupportedShape(FrameShape),
    #[error("frame shape {actual} cannot be stored as {expected}")]
    ShapeMismatch {
        expected: FrameShape,
        actual: FrameShape,
    },
    #[error("shared frame store is closed")]
    Closed,
    #[error("shared frame store lock poisoned")]
    Poisoned,
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("source exhausted")]
    Exhausted,
    #[error("capture device error: {0}")]
    Device(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("jpeg encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported frame shape {0}")]
    UnsupportedShape(FrameShape),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("publishing to the shared frame store failed: {0}")]
    Store(#[from] StoreError),
    #[error("{stage} thread panicked")]
    Panicked { stage: &'static str },
    #[error("failed to spawn {stage} thread: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
}
