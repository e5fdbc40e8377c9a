//! Error types for the frame pipeline.
//!
//! Per-frame errors ([`InferenceError`], [`ClockError`]) never stop a stream;
//! the affected frame is dropped and the error logged. [`StreamError`] is the
//! only error that reaches the driver layer.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a capture source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source already running")]
    AlreadyRunning,

    #[error("capture device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of a single inference pass.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("inference engine failed: {0}")]
    Engine(String),
}

/// Timing event rejected by the stream clock.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("presentation time {pts:?} regressed behind {last:?} beyond the lag tolerance")]
    Regression { pts: Duration, last: Duration },

    #[error("presentation time {pts:?} leads host time {host:?} beyond the lead tolerance")]
    AheadOfHost { pts: Duration, host: Duration },
}

/// Stream-level failure. Fatal to stream startup.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start capture: {0}")]
    Capture(#[from] CaptureError),
}
