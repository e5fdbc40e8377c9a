//! Bounded output queue handed to the consuming driver

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use super::TimedSample;
use crate::stream::ObjectId;

/// Called after every successful enqueue with the owning stream and the new sample.
pub type QueueAlteredProc = dyn Fn(ObjectId, &Arc<TimedSample>) + Send + Sync;

struct AlteredCallback(Box<QueueAlteredProc>);

/// Fixed-capacity FIFO of finished samples.
///
/// The scheduler is the only producer and the driver the only consumer.
/// Enqueue never blocks and fails when the queue is full; elements are only
/// ever removed by [`OutputQueue::dequeue`].
pub struct OutputQueue {
    owner: ObjectId,
    ring: Mutex<HeapRb<Arc<TimedSample>>>,
    capacity: usize,
    on_altered: ArcSwapOption<AlteredCallback>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub rejected: u64,
}

impl OutputQueue {
    /// `capacity` must be non-zero.
    pub fn new(owner: ObjectId, capacity: usize) -> Self {
        Self {
            owner,
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            on_altered: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn owner(&self) -> ObjectId {
        self.owner
    }

    /// Install (or clear) the per-enqueue notification.
    pub fn set_altered_callback(&self, callback: Option<Box<QueueAlteredProc>>) {
        self.on_altered
            .store(callback.map(|cb| Arc::new(AlteredCallback(cb))));
    }

    /// Producer: push a sample, returning `false` if the queue is full.
    pub fn try_enqueue(&self, sample: TimedSample) -> bool {
        let sample = Arc::new(sample);
        let pushed = self.ring().try_push(Arc::clone(&sample)).is_ok();
        if !pushed {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);

        let callback = self.on_altered.load();
        if let Some(callback) = &*callback {
            (callback.0)(self.owner, &sample);
        }
        true
    }

    /// Consumer: pop the oldest sample.
    pub fn dequeue(&self) -> Option<Arc<TimedSample>> {
        let sample = self.ring().try_pop()?;
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(sample)
    }

    pub fn len(&self) -> usize {
        self.ring().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring().is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dequeued: self.stats.dequeued.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    fn ring(&self) -> MutexGuard<'_, HeapRb<Arc<TimedSample>>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OutputQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputQueue")
            .field("owner", &self.owner)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::pipeline::clock::{MediaTime, SampleTiming};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn sample(sequence_number: u64) -> TimedSample {
        TimedSample {
            frame: Frame::new(image::RgbaImage::new(1, 1), sequence_number, Instant::now()),
            sequence_number,
            timing: SampleTiming {
                duration: MediaTime::new(1, 30),
                presentation_timestamp: MediaTime::new(sequence_number as i64, 30),
                decode_timestamp: None,
            },
        }
    }

    #[test]
    fn rejects_when_full() {
        let queue = OutputQueue::new(ObjectId(1), 2);
        assert!(queue.try_enqueue(sample(0)));
        assert!(queue.try_enqueue(sample(1)));
        assert!(queue.is_full());
        assert!(!queue.try_enqueue(sample(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.stats(),
            QueueStats {
                enqueued: 2,
                dequeued: 0,
                rejected: 1
            }
        );
    }

    #[test]
    fn fifo_order() {
        let queue = OutputQueue::new(ObjectId(1), 4);
        for n in 0..3 {
            assert!(queue.try_enqueue(sample(n)));
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue())
            .map(|s| s.sequence_number)
            .collect();
        assert_eq!(order, [0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn notifies_on_enqueue_only() {
        let queue = OutputQueue::new(ObjectId(9), 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        queue.set_altered_callback(Some(Box::new(move |owner: ObjectId, sample: &Arc<TimedSample>| {
            assert_eq!(owner, ObjectId(9));
            assert_eq!(sample.sequence_number, 5);
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(queue.try_enqueue(sample(5)));
        assert!(!queue.try_enqueue(sample(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_callback_still_queues() {
        let queue = OutputQueue::new(ObjectId(1), 1);
        assert!(queue.try_enqueue(sample(0)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let queue = Arc::new(OutputQueue::new(ObjectId(1), 30));
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut accepted = Vec::new();
                for n in 0..1_000 {
                    if queue.try_enqueue(sample(n)) {
                        accepted.push(n);
                    }
                    assert!(queue.len() <= 30);
                }
                accepted
            })
        };

        let mut received = Vec::new();
        while !producer.is_finished() || !queue.is_empty() {
            if let Some(sample) = queue.dequeue() {
                received.push(sample.sequence_number);
            }
        }
        let accepted = producer.join().unwrap();
        while let Some(sample) = queue.dequeue() {
            received.push(sample.sequence_number);
        }
        assert_eq!(received, accepted);
    }
}
