//! Frame pipeline: scheduling, timing and the output queue.

pub mod clock;
pub mod queue;
pub mod scheduler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use crate::capture::Frame;
pub use clock::{ClockSynchronizer, MediaTime, SampleTiming, StreamClock};
pub use queue::{OutputQueue, QueueAlteredProc, QueueStats};
pub use scheduler::{InferenceScheduler, SchedulerStats};

/// A rendered frame with the timing and sequence metadata the driver consumes.
#[derive(Debug)]
pub struct TimedSample {
    pub frame: Frame,
    pub sequence_number: u64,
    pub timing: SampleTiming,
}

impl TimedSample {
    /// Samples never carry discontinuities; the stream is one continuous run.
    pub fn has_discontinuity(&self) -> bool {
        false
    }
}

/// What happened to a frame handed to [`Publisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Enqueued { sequence_number: u64 },
    QueueFull { sequence_number: u64 },
    TimingRejected,
    /// The frame belongs to a run that was stopped after it was admitted.
    Stale,
}

/// Stamps rendered frames and pushes them into the output queue.
///
/// Clock posting, sequence assignment and enqueue happen under one lock so
/// sequence numbers and presentation times both follow enqueue order.
/// The run generation is only bumped under that same lock, so once
/// [`Publisher::invalidate`] returns no older frame can reach the queue.
#[derive(Debug)]
pub struct Publisher {
    synchronizer: ClockSynchronizer,
    queue: Arc<OutputQueue>,
    sequence: Mutex<u64>,
    generation: AtomicU64,
    timing_rejections: AtomicU64,
}

impl Publisher {
    pub fn new(synchronizer: ClockSynchronizer, queue: Arc<OutputQueue>) -> Self {
        Self {
            synchronizer,
            queue,
            sequence: Mutex::new(0),
            generation: AtomicU64::new(0),
            timing_rejections: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<OutputQueue> {
        &self.queue
    }

    pub fn clock(&self) -> &Arc<StreamClock> {
        self.synchronizer.clock()
    }

    /// Next sequence number that will be issued.
    pub fn next_sequence_number(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timing_rejections(&self) -> u64 {
        self.timing_rejections.load(Ordering::Relaxed)
    }

    /// Current run generation. Frames are tagged with it on admission.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Start a new generation. Frames tagged with an older one are refused.
    pub fn invalidate(&self) -> u64 {
        let _sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stamp and enqueue a frame admitted during `generation`.
    pub fn publish(&self, frame: Frame, generation: u64) -> PublishOutcome {
        let mut sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(generation) {
            debug!(frame = frame.meta.sequence, "Stream stopped, discarding result");
            return PublishOutcome::Stale;
        }

        let timing = match self.synchronizer.synchronize(&frame) {
            Ok(timing) => timing,
            Err(e) => {
                self.timing_rejections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped", "reason" => "timing").increment(1);
                warn!(frame = frame.meta.sequence, "Dropping frame: {}", e);
                return PublishOutcome::TimingRejected;
            }
        };

        let sequence_number = *sequence;
        *sequence += 1;

        let sample = TimedSample {
            frame,
            sequence_number,
            timing,
        };
        if self.queue.try_enqueue(sample) {
            metrics::counter!("frames_published").increment(1);
            trace!(sequence_number, "Sample enqueued");
            PublishOutcome::Enqueued { sequence_number }
        } else {
            metrics::counter!("frames_dropped", "reason" => "queue_full").increment(1);
            debug!(sequence_number, "Output queue full, dropping sample");
            PublishOutcome::QueueFull { sequence_number }
        }
    }
}
