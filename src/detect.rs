//! Detection results and the inference engine seam.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::InferenceError;

/// One class hypothesis for a detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub identifier: String,
    pub confidence: f32, // 0.0 to 1.0
}

impl Label {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Normalized bounding box, origin at the top-left of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,      // 0.0 to 1.0
    pub y: f32,      // 0.0 to 1.0
    pub width: f32,  // 0.0 to 1.0
    pub height: f32, // 0.0 to 1.0
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a box reported with a bottom-left origin.
    pub fn from_bottom_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, 1.0 - y - height, width, height)
    }
}

/// A detected object. Labels are kept in descending confidence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    labels: Vec<Label>,
    pub bounding_box: BoundingBox,
}

impl DetectionResult {
    pub fn new(mut labels: Vec<Label>, bounding_box: BoundingBox) -> Self {
        labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self {
            labels,
            bounding_box,
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }
}

/// Object detector invoked once per admitted frame.
///
/// The engine holds no per-stream state the pipeline relies on; a failure
/// only affects the frame it was called with.
pub trait InferenceEngine: Send + Sync + 'static {
    fn detect(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<DetectionResult>, InferenceError>> + Send;
}
