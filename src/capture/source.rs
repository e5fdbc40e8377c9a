//! Capture source abstraction and a synthetic test-pattern source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::error::CaptureError;

/// Per-frame callback installed by the stream. Must not block.
pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync>;

/// Anything that produces frames at a fixed resolution and rate.
pub trait CaptureSource: Send {
    /// Begin delivering frames to `sink` from the source's own thread.
    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError>;

    /// Stop delivering frames. Frames already handed to the sink are unaffected.
    fn stop(&mut self);
}

/// Generates a moving test pattern at a fixed rate.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    fps: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn pattern(width: u32, height: u32, sequence: u64) -> RgbaImage {
        let bar = (sequence as u32).wrapping_mul(4) % width.max(1);
        RgbaImage::from_fn(width, height, |x, y| {
            if x.abs_diff(bar) < 8 {
                Rgba([255, 255, 255, 255])
            } else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                Rgba([r, g, 96, 255])
            }
        })
    }
}

impl CaptureSource for SyntheticCapture {
    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning);
        }

        let (width, height) = (self.width, self.height);
        let interval = Duration::from_secs(1) / self.fps;
        let running = Arc::clone(&self.running);
        info!(width, height, fps = self.fps, "Starting synthetic capture");

        let worker = std::thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                let mut sequence = 0u64;
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    let image = Self::pattern(width, height, sequence);
                    sink(Frame::new(image, sequence, Instant::now()));
                    sequence += 1;

                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                debug!(frames = sequence, "Synthetic capture loop exited");
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Synthetic capture thread panicked");
            }
        }
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn delivers_frames_until_stopped() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let mut capture = SyntheticCapture::new(32, 24, 200);
        capture
            .start(Arc::new(move |frame: Frame| {
                assert_eq!(frame.image.dimensions(), (32, 24));
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        capture.stop();

        let delivered = count.load(Ordering::SeqCst);
        assert!(delivered > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), delivered);
    }

    #[test]
    fn double_start_is_rejected() {
        let mut capture = SyntheticCapture::new(8, 8, 30);
        capture.start(Arc::new(|_| {})).unwrap();
        assert!(matches!(
            capture.start(Arc::new(|_| {})),
            Err(CaptureError::AlreadyRunning)
        ));
        capture.stop();
    }
}
