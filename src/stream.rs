//! Stream controller: lifecycle, wiring and the properties the driver reads.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::{info, instrument, warn};

use crate::capture::{CaptureSource, Frame, FrameSink, PixelFormat};
use crate::detect::InferenceEngine;
use crate::error::StreamError;
use crate::overlay::OverlayRenderer;
use crate::pipeline::{
    ClockSynchronizer, InferenceScheduler, OutputQueue, Publisher, QueueAlteredProc, StreamClock,
};
use crate::{ClockConfig, Metrics, OverlayConfig, PipelineConfig, StreamConfig};

/// Identity the host assigned to the stream object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data flow direction advertised to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// Read-only stream description for the driver registration layer.
#[derive(Debug, Clone)]
pub struct StreamProperties {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub direction: Direction,
    pub frame_rate: f64,
    pub min_frame_rate: f64,
    pub frame_rate_range: RangeInclusive<f64>,
    pub clock: Arc<StreamClock>,
}

/// Everything a stream needs besides its capture source and engine.
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    pub stream: StreamConfig,
    pub pipeline: PipelineConfig,
    pub overlay: OverlayConfig,
    pub clock: ClockConfig,
}

impl From<&crate::Config> for StreamSettings {
    fn from(config: &crate::Config) -> Self {
        Self {
            stream: config.stream.clone(),
            pipeline: config.pipeline.clone(),
            overlay: config.overlay.clone(),
            clock: config.clock.clone(),
        }
    }
}

/// One synthetic camera stream.
pub struct Stream<E> {
    object_id: ObjectId,
    properties: StreamProperties,
    publisher: Arc<Publisher>,
    scheduler: Arc<InferenceScheduler<E>>,
    capture: Mutex<Box<dyn CaptureSource>>,
    running: AtomicBool,
}

impl<E: InferenceEngine> Stream<E> {
    /// Build the clock, queue and scheduler. Fails on unusable configuration;
    /// such a stream is never started.
    pub fn new(
        object_id: ObjectId,
        settings: StreamSettings,
        capture: Box<dyn CaptureSource>,
        engine: Arc<E>,
        runtime: Handle,
    ) -> Result<Self, StreamError> {
        let StreamSettings {
            stream,
            pipeline,
            overlay,
            clock,
        } = settings;
        validate(&stream, &pipeline, &clock)?;

        let clock = Arc::new(StreamClock::new(format!("{} clock", stream.name), &clock));
        let queue = Arc::new(OutputQueue::new(object_id, pipeline.queue_capacity));
        let publisher = Arc::new(Publisher::new(
            ClockSynchronizer::new(Arc::clone(&clock), stream.frame_rate),
            queue,
        ));
        let scheduler = Arc::new(InferenceScheduler::new(
            engine,
            OverlayRenderer::new(overlay),
            Arc::clone(&publisher),
            pipeline,
            runtime,
        ));

        let properties = StreamProperties {
            name: stream.name.clone(),
            width: stream.width,
            height: stream.height,
            pixel_format: PixelFormat::Rgba32,
            direction: Direction::Output,
            frame_rate: stream.frame_rate as f64,
            min_frame_rate: stream.min_frame_rate as f64,
            frame_rate_range: stream.min_frame_rate as f64..=stream.frame_rate as f64,
            clock,
        };

        info!(
            %object_id,
            name = %properties.name,
            width = properties.width,
            height = properties.height,
            fps = properties.frame_rate,
            "Stream created"
        );

        Ok(Self {
            object_id,
            properties,
            publisher,
            scheduler,
            capture: Mutex::new(capture),
            running: AtomicBool::new(false),
        })
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn properties(&self) -> &StreamProperties {
        &self.properties
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register the per-enqueue callback and hand out the queue.
    pub fn copy_output_queue(&self, on_altered: Option<Box<QueueAlteredProc>>) -> Arc<OutputQueue> {
        let queue = self.publisher.queue();
        queue.set_altered_callback(on_altered);
        Arc::clone(queue)
    }

    /// Wire capture to the scheduler and start capturing.
    #[instrument(skip(self), fields(object_id = %self.object_id))]
    pub fn start(&self) -> Result<(), StreamError> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Stream already running");
            return Ok(());
        }

        let scheduler = Arc::clone(&self.scheduler);
        let sink: FrameSink = Arc::new(move |frame: Frame| scheduler.submit(frame));
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = capture.start(sink) {
            self.running.store(false, Ordering::Release);
            return Err(e.into());
        }

        info!("Stream started");
        Ok(())
    }

    /// Stop capturing. Inference already in flight finishes but is not published.
    #[instrument(skip(self), fields(object_id = %self.object_id))]
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
        self.scheduler.invalidate();
        info!("Stream stopped");
    }

    pub fn metrics(&self) -> Metrics {
        let scheduler = self.scheduler.stats();
        let queue = self.publisher.queue();
        Metrics {
            frames_submitted: scheduler.submitted,
            frames_admitted: scheduler.admitted,
            frames_superseded: scheduler.superseded,
            frames_shed: scheduler.shed,
            inference_failures: scheduler.failed,
            frames_published: scheduler.published,
            timing_rejections: self.publisher.timing_rejections(),
            queue_rejections: queue.stats().rejected,
            queue_depth: queue.len(),
        }
    }
}

impl<E> Drop for Stream<E> {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop();
        }
    }
}

fn validate(
    stream: &StreamConfig,
    pipeline: &PipelineConfig,
    clock: &ClockConfig,
) -> Result<(), StreamError> {
    let invalid = |msg: String| -> Result<(), StreamError> { Err(StreamError::InvalidConfig(msg)) };
    if stream.width == 0 || stream.height == 0 {
        return invalid(format!("dimensions {}x{}", stream.width, stream.height));
    }
    if stream.frame_rate == 0 {
        return invalid("frame rate must be positive".into());
    }
    if stream.min_frame_rate > stream.frame_rate {
        return invalid(format!(
            "minimum frame rate {} exceeds {}",
            stream.min_frame_rate, stream.frame_rate
        ));
    }
    if pipeline.queue_capacity == 0 {
        return invalid("queue capacity must be positive".into());
    }
    if clock.ticks_per_second == 0 {
        return invalid("clock resolution must be positive".into());
    }
    Ok(())
}
