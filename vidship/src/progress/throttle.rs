//! Rate limiter for downstream progress notifications.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Phase, Progress, ProgressSink};

/// Per-job throttle around a downstream sink.
///
/// The consuming messaging API enforces its own ceiling on status-update
/// edits, so events are forwarded only when one of these holds:
///
/// - the minimum interval has elapsed since the last forwarded event,
/// - percent reached 100,
/// - percent advanced by at least the minimum delta, or
/// - the phase tag changed (the percent baseline resets with it).
///
/// Everything else is dropped silently, never queued. The last-seen state is
/// serialized behind a mutex, so the throttle may be shared across the reader
/// tasks of a single job.
pub struct Throttle<'a> {
    sink: &'a dyn ProgressSink,
    interval: Duration,
    min_delta: f64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_forward: Option<Instant>,
    last_percent: f64,
    last_phase: Option<Phase>,
}

impl<'a> Throttle<'a> {
    pub fn new(sink: &'a dyn ProgressSink, interval: Duration, min_delta: f64) -> Self {
        Self {
            sink,
            interval,
            min_delta,
            state: Mutex::new(State::default()),
        }
    }

    fn should_forward(&self, state: &State, progress: &Progress, now: Instant) -> bool {
        if state.last_phase != Some(progress.phase) {
            return true;
        }
        if progress.percent >= 100.0 {
            return true;
        }
        if progress.percent - state.last_percent >= self.min_delta {
            return true;
        }
        state
            .last_forward
            .is_none_or(|at| now.duration_since(at) >= self.interval)
    }
}

impl ProgressSink for Throttle<'_> {
    fn notify(&self, progress: Progress) {
        let now = Instant::now();
        // The lock is held across the downstream call so forwarded events
        // stay ordered even when reader tasks race.
        let mut state = self.state.lock();
        if !self.should_forward(&state, &progress, now) {
            return;
        }
        state.last_forward = Some(now);
        state.last_percent = progress.percent;
        state.last_phase = Some(progress.phase);
        self.sink.notify(progress);
    }
}
