pub mod capture;
pub mod detect;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod stream;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{CaptureSource, Frame, FrameSink};
pub use detect::{BoundingBox, DetectionResult, InferenceEngine, Label};
pub use error::{CaptureError, ClockError, InferenceError, StreamError};
pub use overlay::OverlayRenderer;
pub use pipeline::{OutputQueue, TimedSample};
pub use stream::{ObjectId, Stream, StreamProperties, StreamSettings};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub pipeline: PipelineConfig,
    pub overlay: OverlayConfig,
    pub clock: ClockConfig,
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `YOLOCAM__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("YOLOCAM").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Capture settings producing frames at the stream's advertised size and rate.
    pub fn stream_capture(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.stream.width,
            height: self.stream.height,
            fps: self.stream.frame_rate,
            ..self.capture.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Empty selects the first usable V4L2 device.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

/// Per-stream properties, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub min_frame_rate: u32,
}

impl StreamConfig {
    /// 1280x720 at 30 fps, advertising a 0..=30 frame-rate range.
    pub fn hd720() -> Self {
        Self {
            name: "YOLO Cam".into(),
            width: 1280,
            height: 720,
            frame_rate: 30,
            min_frame_rate: 0,
        }
    }

    /// 320x240 at a fixed 30 fps.
    pub fn qvga() -> Self {
        Self {
            name: "YOLO Cam".into(),
            width: 320,
            height: 240,
            frame_rate: 30,
            min_frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Skip inference entirely while the output queue is full.
    pub shed_when_queue_full: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub max_labels: usize,
    pub fill_color: [u8; 4],
    pub text_color: [u8; 4],
    pub text_scale: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub ticks_per_second: u32,
    pub lead_ticks: u32,
    pub lag_ticks: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::hd720()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 30,
            shed_when_queue_full: true,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            max_labels: 3,
            // black at 10% opacity
            fill_color: [0, 0, 0, 26],
            text_color: [255, 255, 255, 255],
            text_scale: 2,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 10,
            lead_ticks: 100,
            lag_ticks: 10,
        }
    }
}

/// Performance metrics collected throughout the pipeline
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    pub frames_submitted: u64,
    pub frames_admitted: u64,
    pub frames_superseded: u64,
    pub frames_shed: u64,
    pub inference_failures: u64,
    pub frames_published: u64,
    pub timing_rejections: u64,
    pub queue_rejections: u64,
    pub queue_depth: usize,
}
