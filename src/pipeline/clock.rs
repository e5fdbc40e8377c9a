//! Stream clock and presentation timing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capture::Frame;
use crate::error::ClockError;
use crate::ClockConfig;

/// Rational media time, `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_nanos() as i64, Self::NANOS_PER_SECOND)
    }

    pub fn as_duration(&self) -> Duration {
        if self.timescale == 0 || self.value < 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            (self.value as i128 * Self::NANOS_PER_SECOND as i128 / self.timescale as i128) as u64,
        )
    }
}

/// Timing attached to a published sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub duration: MediaTime,
    pub presentation_timestamp: MediaTime,
    /// Always `None`: frames are never reordered.
    pub decode_timestamp: Option<MediaTime>,
}

#[derive(Debug, Default)]
struct ClockState {
    last_pts: Option<Duration>,
    events: u64,
}

/// The stream's logical clock, advanced by one timing event per published frame.
#[derive(Debug)]
pub struct StreamClock {
    name: String,
    epoch: Instant,
    tick: Duration,
    lead_tolerance: Duration,
    lag_tolerance: Duration,
    state: Mutex<ClockState>,
}

impl StreamClock {
    pub fn new(name: impl Into<String>, config: &ClockConfig) -> Self {
        Self::with_epoch(name, config, Instant::now())
    }

    pub fn with_epoch(name: impl Into<String>, config: &ClockConfig, epoch: Instant) -> Self {
        let tick = Duration::from_secs(1) / config.ticks_per_second.max(1);
        Self {
            name: name.into(),
            epoch,
            tick,
            lead_tolerance: tick * config.lead_ticks,
            lag_tolerance: tick * config.lag_ticks,
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Tick resolution of the clock.
    pub fn resolution(&self) -> Duration {
        self.tick
    }

    /// Host time elapsed since the clock epoch.
    pub fn host_time(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Number of accepted timing events.
    pub fn events(&self) -> u64 {
        self.lock().events
    }

    /// Post a timing event and return the accepted presentation time.
    ///
    /// Jitter within the lag tolerance is absorbed by clamping to the last
    /// accepted time, so accepted times never decrease. `resynchronize`
    /// forgets the previous time first.
    pub fn post_timing_event(
        &self,
        pts: Duration,
        host_time: Duration,
        resynchronize: bool,
    ) -> Result<Duration, ClockError> {
        if pts > host_time + self.lead_tolerance {
            return Err(ClockError::AheadOfHost {
                pts,
                host: host_time,
            });
        }

        let mut state = self.lock();
        if resynchronize {
            state.last_pts = None;
        }
        let accepted = match state.last_pts {
            Some(last) if pts + self.lag_tolerance < last => {
                return Err(ClockError::Regression { pts, last });
            }
            Some(last) => pts.max(last),
            None => pts,
        };
        state.last_pts = Some(accepted);
        state.events += 1;
        Ok(accepted)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turns capture instants into presentation timing on a [`StreamClock`].
#[derive(Debug)]
pub struct ClockSynchronizer {
    clock: Arc<StreamClock>,
    frame_duration: MediaTime,
}

impl ClockSynchronizer {
    pub fn new(clock: Arc<StreamClock>, frame_rate: u32) -> Self {
        Self {
            clock,
            frame_duration: MediaTime::new(1, frame_rate.max(1)),
        }
    }

    pub fn clock(&self) -> &Arc<StreamClock> {
        &self.clock
    }

    pub fn synchronize(&self, frame: &Frame) -> Result<SampleTiming, ClockError> {
        let pts = frame.timestamp.saturating_duration_since(self.clock.epoch());
        let host = self.clock.host_time();
        let accepted = self.clock.post_timing_event(pts, host, false)?;
        if accepted != pts {
            debug!(?pts, ?accepted, "Clamped presentation time");
        }
        Ok(SampleTiming {
            duration: self.frame_duration,
            presentation_timestamp: MediaTime::from_duration(accepted),
            decode_timestamp: None,
        })
    }
}
