//! Single in-flight, latest-wins inference scheduling.
//!
//! Every captured frame replaces whatever frame is waiting in a one-slot
//! mailbox. At most one dispatch task waits on the one-permit semaphore;
//! when it gets the permit it takes whatever the mailbox holds at that
//! moment. Everything else is dropped without running inference, so under
//! load the engine always works on the newest frame available when it
//! becomes free, and a hung engine holds one frame and one task at most.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, instrument, trace};

use super::{PublishOutcome, Publisher};
use crate::capture::Frame;
use crate::detect::InferenceEngine;
use crate::overlay::OverlayRenderer;
use crate::PipelineConfig;

/// A frame waiting for admission.
struct InferenceRequest {
    generation: u64,
    frame: Frame,
}

#[derive(Default)]
struct Mailbox {
    pending: Option<InferenceRequest>,
    /// A dispatch task exists that has not yet taken `pending`.
    dispatch_scheduled: bool,
}

#[derive(Default)]
struct Stats {
    submitted: AtomicU64,
    admitted: AtomicU64,
    superseded: AtomicU64,
    shed: AtomicU64,
    failed: AtomicU64,
    published: AtomicU64,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub admitted: u64,
    pub superseded: u64,
    pub shed: u64,
    pub failed: u64,
    pub published: u64,
}

pub struct InferenceScheduler<E> {
    engine: Arc<E>,
    renderer: OverlayRenderer,
    publisher: Arc<Publisher>,
    config: PipelineConfig,
    runtime: Handle,
    gate: Arc<Semaphore>,
    mailbox: Mutex<Mailbox>,
    stats: CachePadded<Stats>,
}

impl<E: InferenceEngine> InferenceScheduler<E> {
    pub fn new(
        engine: Arc<E>,
        renderer: OverlayRenderer,
        publisher: Arc<Publisher>,
        config: PipelineConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            renderer,
            publisher,
            config,
            runtime,
            gate: Arc::new(Semaphore::new(1)),
            mailbox: Mutex::new(Mailbox::default()),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Hand a captured frame to the scheduler. Never waits on inference.
    pub fn submit(self: &Arc<Self>, frame: Frame) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if self.config.shed_when_queue_full && self.publisher.queue().is_full() {
            self.stats.shed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_dropped", "reason" => "backpressure").increment(1);
            trace!(frame = frame.meta.sequence, "Output queue full, skipping inference");
            return;
        }

        let request = InferenceRequest {
            generation: self.publisher.generation(),
            frame,
        };
        let spawn = {
            let mut mailbox = self.mailbox();
            if let Some(stale) = mailbox.pending.replace(request) {
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped", "reason" => "superseded").increment(1);
                trace!(frame = stale.frame.meta.sequence, "Superseded before admission");
            }
            !std::mem::replace(&mut mailbox.dispatch_scheduled, true)
        };

        if spawn {
            let this = Arc::clone(self);
            self.runtime.spawn(async move { this.dispatch().await });
        }
    }

    /// Abandon pending work and make in-flight results unpublishable.
    pub fn invalidate(&self) {
        self.publisher.invalidate();
        if let Some(stale) = self.mailbox().pending.take() {
            debug!(frame = stale.frame.meta.sequence, "Discarding pending frame");
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
            shed: self.stats.shed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            published: self.stats.published.load(Ordering::Relaxed),
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn dispatch(self: Arc<Self>) {
        let permit = Arc::clone(&self.gate).acquire_owned().await;

        // Taking the slot and clearing the flag under one lock means a frame
        // submitted after this point schedules a fresh dispatch task.
        let request = {
            let mut mailbox = self.mailbox();
            mailbox.dispatch_scheduled = false;
            mailbox.pending.take()
        };
        let (Ok(permit), Some(request)) = (permit, request) else {
            return;
        };
        if !self.publisher.is_current(request.generation) {
            return;
        }

        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        let sequence = request.frame.meta.sequence;
        let started = Instant::now();
        let result = match request.frame.validate() {
            Ok(()) => self.engine.detect(&request.frame).await,
            Err(e) => Err(e),
        };
        drop(permit);
        metrics::histogram!("inference_time_us").record(started.elapsed().as_micros() as f64);

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped", "reason" => "inference").increment(1);
                error!(frame = sequence, "Inference failed: {}", e);
                return;
            }
        };

        if !self.publisher.is_current(request.generation) {
            debug!(frame = sequence, "Stream stopped during inference, discarding result");
            return;
        }

        let frame = self.renderer.render(&detections, request.frame);
        if let PublishOutcome::Enqueued { .. } =
            self.publisher.publish(frame, request.generation)
        {
            self.stats.published.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectionResult, Label};
    use crate::error::InferenceError;
    use crate::pipeline::{ClockSynchronizer, OutputQueue, StreamClock};
    use crate::stream::ObjectId;
    use crate::ClockConfig;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Blocks every call until released; records what it saw.
    #[derive(Default)]
    struct GatedEngine {
        release: Notify,
        seen: Mutex<Vec<u64>>,
        entered: Notify,
    }

    impl InferenceEngine for GatedEngine {
        async fn detect(&self, frame: &Frame) -> Result<Vec<DetectionResult>, InferenceError> {
            self.seen.lock().unwrap().push(frame.meta.sequence);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![DetectionResult::new(
                vec![Label::new("person", 0.9)],
                BoundingBox::new(0.0, 0.0, 0.5, 0.5),
            )])
        }
    }

    fn scheduler(engine: Arc<GatedEngine>) -> Arc<InferenceScheduler<GatedEngine>> {
        let clock = Arc::new(StreamClock::new("test clock", &ClockConfig::default()));
        let publisher = Arc::new(Publisher::new(
            ClockSynchronizer::new(clock, 30),
            Arc::new(OutputQueue::new(ObjectId(1), 30)),
        ));
        Arc::new(InferenceScheduler::new(
            engine,
            OverlayRenderer::default(),
            publisher,
            PipelineConfig::default(),
            Handle::current(),
        ))
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(image::RgbaImage::new(8, 8), sequence, Instant::now())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn only_latest_frame_runs_after_busy_period() {
        let engine = Arc::new(GatedEngine::default());
        let scheduler = scheduler(Arc::clone(&engine));

        scheduler.submit(frame(0));
        engine.entered.notified().await;

        for n in 1..=5 {
            scheduler.submit(frame(n));
        }
        settle().await;
        engine.release.notify_one();

        engine.entered.notified().await;
        engine.release.notify_one();
        settle().await;

        assert_eq!(*engine.seen.lock().unwrap(), vec![0, 5]);
        let stats = scheduler.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.superseded, 4);
        assert_eq!(stats.published, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_engine_keeps_one_waiting_task() {
        let engine = Arc::new(GatedEngine::default());
        let scheduler = scheduler(Arc::clone(&engine));
        let runtime = Handle::current().metrics();

        scheduler.submit(frame(0));
        engine.entered.notified().await;
        let busy = runtime.num_alive_tasks();

        for n in 1..=1000 {
            scheduler.submit(frame(n));
        }
        settle().await;
        assert!(runtime.num_alive_tasks() <= busy + 1);
        assert_eq!(scheduler.stats().superseded, 999);

        engine.release.notify_one();
        engine.entered.notified().await;
        engine.release.notify_one();
        settle().await;

        assert_eq!(*engine.seen.lock().unwrap(), vec![0, 1000]);
        assert_eq!(scheduler.stats().published, 2);
        assert_eq!(runtime.num_alive_tasks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalidate_discards_in_flight_result() {
        let engine = Arc::new(GatedEngine::default());
        let scheduler = scheduler(Arc::clone(&engine));

        scheduler.submit(frame(0));
        engine.entered.notified().await;
        scheduler.invalidate();
        engine.release.notify_one();
        settle().await;

        assert_eq!(scheduler.stats().published, 0);
        assert!(scheduler.publisher.queue().is_empty());
    }
}
