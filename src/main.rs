//! YOLO Cam pipeline runner: synthetic (or V4L2) capture, a stand-in
//! detector, and a consumer that drains the output queue like the driver would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::{info, warn};

use yolocam::capture::CaptureSource;
use yolocam::{
    BoundingBox, Config, DetectionResult, Frame, InferenceEngine, InferenceError, Label, ObjectId,
    Stream, StreamSettings, TimedSample,
};

/// Reports one fixed detection after a simulated inference latency.
struct FixedDetector {
    latency: Duration,
}

impl InferenceEngine for FixedDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectionResult>, InferenceError> {
        tokio::time::sleep(self.latency).await;
        Ok(vec![DetectionResult::new(
            vec![Label::new("person", 0.873), Label::new("dog", 0.12)],
            BoundingBox::new(0.3, 0.2, 0.4, 0.6),
        )])
    }
}

#[cfg(feature = "v4l2")]
fn capture_source(config: &Config) -> Result<Box<dyn CaptureSource>> {
    let capture = yolocam::capture::v4l2::resolve_device(config.stream_capture())?;
    Ok(Box::new(yolocam::capture::V4l2Capture::new(capture)))
}

#[cfg(not(feature = "v4l2"))]
fn capture_source(config: &Config) -> Result<Box<dyn CaptureSource>> {
    let capture = config.stream_capture();
    Ok(Box::new(yolocam::capture::SyntheticCapture::new(
        capture.width,
        capture.height,
        capture.fps,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yolocam=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("YOLO Cam launching...");

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    yolocam::CONFIG.store(Arc::new(Config::load(path.as_deref())?));
    let config = yolocam::CONFIG.load_full();

    let engine = Arc::new(FixedDetector {
        latency: Duration::from_millis(80),
    });
    let stream = Stream::new(
        ObjectId(1),
        StreamSettings::from(&*config),
        capture_source(&config)?,
        engine,
        tokio::runtime::Handle::current(),
    )?;

    // The driver is told about each enqueue and drains on its own thread.
    let (tx, rx) = flume::bounded::<u64>(config.pipeline.queue_capacity);
    let queue = stream.copy_output_queue(Some(Box::new(move |_: ObjectId, sample: &Arc<TimedSample>| {
        let _ = tx.try_send(sample.sequence_number);
    })));

    let drain = Arc::clone(&queue);
    let consumer = tokio::spawn(async move {
        let mut delivered = 0u64;
        let mut window = Instant::now();
        while rx.recv_async().await.is_ok() {
            while let Some(sample) = drain.dequeue() {
                delivered += 1;
                metrics::histogram!("frame_latency_ms")
                    .record(sample.frame.timestamp.elapsed().as_millis() as f64);
            }
            if window.elapsed() >= Duration::from_secs(1) {
                info!(delivered, depth = drain.len(), "Consumer stats");
                window = Instant::now();
            }
        }
    });

    stream.start()?;
    tokio::signal::ctrl_c().await?;

    stream.stop();
    info!(metrics = ?stream.metrics(), "YOLO Cam shutting down");
    // Dropping the callback closes the notification channel.
    queue.set_altered_callback(None);
    drop(stream);
    if let Err(e) = consumer.await {
        warn!("Consumer task failed: {}", e);
    }
    Ok(())
}
