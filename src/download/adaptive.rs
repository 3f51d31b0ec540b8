//! Latency-driven concurrency controller.
//!
//! Keeps a sliding window of observed request latencies and moves a
//! concurrency setpoint between fixed bounds: fast responses grow the
//! setpoint one step at a time, slow responses or failures halve it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

/// Number of latency samples in the sliding window.
const WINDOW_SIZE: usize = 5;

/// Average latency below which concurrency may grow.
const FAST_THRESHOLD: Duration = Duration::from_millis(400);

/// Average latency above which concurrency is halved.
const SLOW_THRESHOLD: Duration = Duration::from_millis(800);

#[derive(Debug)]
struct ControllerState {
    current: usize,
    window: VecDeque<Duration>,
}

/// Adaptive concurrency controller.
///
/// All operations are atomic under a single internal mutex; the bounds are
/// fixed at construction and `min <= current() <= max` always holds.
#[derive(Debug)]
pub struct AdaptiveController {
    min: usize,
    max: usize,
    state: Mutex<ControllerState>,
}

impl AdaptiveController {
    /// Creates a controller starting at `start` in-flight requests.
    ///
    /// `start` is clamped into `[min, max]`; a zero `min` becomes 1.
    #[must_use]
    pub fn new(start: usize, min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            state: Mutex::new(ControllerState {
                current: start.clamp(min, max),
                window: VecDeque::with_capacity(WINDOW_SIZE),
            }),
        }
    }

    /// Records an observed request latency, dropping the oldest sample once
    /// the window is full.
    pub fn add_latency(&self, latency: Duration) {
        let mut state = self.lock();
        state.window.push_back(latency);
        if state.window.len() > WINDOW_SIZE {
            state.window.pop_front();
        }
    }

    /// Adjusts the setpoint from the latest outcome.
    ///
    /// A failure halves the setpoint immediately. On success, once the
    /// window is full: average below 400ms grows by one, above 800ms halves,
    /// otherwise no change.
    pub fn adjust(&self, success: bool) {
        let mut state = self.lock();

        if !success {
            state.current = (state.current / 2).max(self.min);
            debug!(current = state.current, "halved concurrency after failure");
            return;
        }

        if state.window.len() < WINDOW_SIZE {
            return;
        }

        let sum: Duration = state.window.iter().sum();
        let avg = sum / state.window.len() as u32;

        if avg < FAST_THRESHOLD && state.current < self.max {
            state.current += 1;
            debug!(current = state.current, avg_ms = avg.as_millis() as u64, "raised concurrency");
        } else if avg > SLOW_THRESHOLD {
            state.current = (state.current / 2).max(self.min);
            debug!(current = state.current, avg_ms = avg.as_millis() as u64, "halved concurrency");
        }
    }

    /// Returns the current setpoint.
    #[must_use]
    pub fn current(&self) -> usize {
        self.lock().current
    }

    /// Returns the fixed lower bound.
    #[must_use]
    pub fn min(&self) -> usize {
        self.min
    }

    /// Returns the fixed upper bound.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        // A poisoned lock can only mean a panic mid-adjust; the state is a
        // plain counter plus window, both still valid.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
