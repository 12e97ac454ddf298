//! Lookout: live capture, detection overlay and republishing pipeline.
//!
//! Frames flow `capture -> detect -> annotate -> shared store -> MJPEG stream`.
//! Stages run on their own threads, connected by typed channels, and every loop
//! observes a cooperative [`lifecycle::StopSignal`].

pub mod capture;
pub mod detect;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod store;
pub mod stream;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameShape, PixelFormat};
pub use error::ConfigError;

/// Environment prefix for overrides, e.g. `LOOKOUT__STREAM__BIND=0.0.0.0:8080`
pub const ENV_PREFIX: &str = "LOOKOUT";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub overlay: OverlayConfig,
    pub store: StoreConfig,
    pub stream: StreamConfig,
    pub control: ControlConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// `synthetic` or a V4L2 device path such as `/dev/video0`
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub retry_backoff_ms: u64,
}

/// A detector class the pipeline keeps, with its display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub classes: Vec<ClassLabel>,
    pub max_boxes: usize,
    pub wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub freshness_window_ms: u64,
    pub active_color: [u8; 3],
    pub muted_color: [u8; 3],
    pub thickness: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub bind: String,
    pub send_interval_ms: u64,
    pub idle_wait_ms: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub throttle_path: PathBuf,
    pub default_delay_secs: f64,
    pub persist_interval_ms: u64,
    pub console: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub grace_period_ms: u64,
    /// Command run after cleanup to stop dependent processes, empty for none
    pub on_shutdown: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "synthetic".into(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            retry_backoff_ms: 50,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let label = |id: u32, name: &str| ClassLabel {
            id,
            name: name.into(),
        };
        Self {
            classes: vec![
                label(0, "person"),
                label(46, "banana"),
                label(64, "mouse"),
                label(67, "cell phone"),
            ],
            max_boxes: 5,
            wait_ms: 500,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: 300,
            active_color: [0, 255, 0],
            muted_color: [128, 128, 128],
            thickness: 2,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "frame_buffer".into(),
            width: 640,
            height: 480,
            channels: 3,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".into(),
            // 10 fps egress
            send_interval_ms: 100,
            idle_wait_ms: 10,
            jpeg_quality: 80,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            throttle_path: PathBuf::from(".throttle"),
            default_delay_secs: lifecycle::DEFAULT_THROTTLE_DELAY,
            persist_interval_ms: 1000,
            console: true,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            on_shutdown: Vec::new(),
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file at `path` if present, then env overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.store.channels, 1 | 3 | 4) {
            return Err(ConfigError::Invalid(format!(
                "store.channels must be 1, 3 or 4, got {}",
                self.store.channels
            )));
        }
        if self.store.width == 0 || self.store.height == 0 {
            return Err(ConfigError::Invalid("store dimensions must be non-zero".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid("capture dimensions must be non-zero".into()));
        }
        if self.stream.send_interval_ms == 0 {
            return Err(ConfigError::Invalid("stream.send_interval_ms must be non-zero".into()));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(ConfigError::Invalid("stream.jpeg_quality must be in 1..=100".into()));
        }
        Ok(())
    }

    pub fn store_shape(&self) -> FrameShape {
        FrameShape::new(self.store.height, self.store.width, self.store.channels)
    }

    pub fn target_classes(&self) -> Vec<u32> {
        self.detection.classes.iter().map(|c| c.id).collect()
    }
}

impl OverlayConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.store.name, "frame_buffer");
        assert_eq!(config.store_shape(), FrameShape::new(480, 640, 3));
        assert_eq!(config.detection.max_boxes, 5);
        assert_eq!(config.target_classes(), vec![0, 46, 64, 67]);
        assert_eq!(config.stream.send_interval_ms, 100);
        assert_eq!(config.control.default_delay_secs, 5.0);
        config.validate().unwrap();
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
name = "test_buffer"
width = 320
height = 240

[[detection.classes]]
id = 2
name = "car"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.store.name, "test_buffer");
        assert_eq!(config.store_shape(), FrameShape::new(240, 320, 3));
        assert_eq!(config.target_classes(), vec![2]);
        // Untouched sections keep their defaults
        assert_eq!(config.overlay.freshness_window_ms, 300);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/lookout.toml"))).unwrap();
        assert_eq!(config.stream.bind, "0.0.0.0:5000");
    }

    #[test]
    fn rejects_unsupported_channel_count() {
        let mut config = Config::default();
        config.store.channels = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
