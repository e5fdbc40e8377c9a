pub mod decoder;
pub mod frame;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use source::{CaptureSource, FrameSink, SyntheticCapture};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
