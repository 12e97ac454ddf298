pub mod decoder;
pub mod frame;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{Frame, FrameShape, PixelFormat};
pub use source::{open_source, ScriptedSource, SyntheticSource, VideoSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
