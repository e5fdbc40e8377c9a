#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use tokio::sync::{mpsc, Semaphore};
use yolocam::{
    BoundingBox, CaptureError, CaptureSource, DetectionResult, Frame, FrameSink, InferenceEngine,
    InferenceError, Label,
};

/// Capture source driven by the test: frames are pushed by hand.
#[derive(Clone, Default)]
pub struct ManualCapture {
    sink: Arc<Mutex<Option<FrameSink>>>,
    fail_start: bool,
}

impl ManualCapture {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Deliver a frame as the capture thread would. Returns false if stopped.
    pub fn push(&self, frame: Frame) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }
}

impl CaptureSource for ManualCapture {
    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Device("no camera".into()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().unwrap().take();
    }
}

pub fn frame(sequence: u64) -> Frame {
    Frame::new(
        RgbaImage::from_pixel(64, 48, Rgba([90, 120, 150, 255])),
        sequence,
        Instant::now(),
    )
}

pub fn person() -> DetectionResult {
    DetectionResult::new(
        vec![Label::new("person", 0.873)],
        BoundingBox::new(0.25, 0.25, 0.5, 0.5),
    )
}

/// Engine that answers immediately, failing for selected frames.
#[derive(Default)]
pub struct ScriptedEngine {
    pub fail_on: HashSet<u64>,
    pub detections: Vec<DetectionResult>,
    pub seen: Mutex<Vec<u64>>,
}

impl InferenceEngine for ScriptedEngine {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionResult>, InferenceError> {
        self.seen.lock().unwrap().push(frame.meta.sequence);
        if self.fail_on.contains(&frame.meta.sequence) {
            return Err(InferenceError::Engine(format!(
                "model rejected frame {}",
                frame.meta.sequence
            )));
        }
        Ok(self.detections.clone())
    }
}

/// Engine that parks every call until the test releases it.
pub struct GatedEngine {
    entered: mpsc::UnboundedSender<u64>,
    release: Semaphore,
}

impl GatedEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<u64>) {
        let (entered, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            entered,
            release: Semaphore::new(0),
        });
        (engine, rx)
    }

    pub fn release_one(&self) {
        self.release.add_permits(1);
    }
}

impl InferenceEngine for GatedEngine {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionResult>, InferenceError> {
        let _ = self.entered.send(frame.meta.sequence);
        self.release
            .acquire()
            .await
            .map_err(|e| InferenceError::Engine(e.to_string()))?
            .forget();
        Ok(vec![person()])
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give spawned dispatch tasks time to reach the admission gate.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
