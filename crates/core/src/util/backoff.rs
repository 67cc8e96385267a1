//! Exponential backoff gate shared by guard-list retries and network-down
//! recovery probes.
//!
//! Unlike a stateless delay calculator, [`ExponentialTimer`] remembers when it
//! may fire next. Callers check [`ExponentialTimer::is_ready`] and, when it
//! is, [`ExponentialTimer::fire`] it, which schedules the next ready time and
//! grows the delay for the one after.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use guardsim::util::backoff::ExponentialTimer;
//!
//! let mut timer = ExponentialTimer::new(Duration::from_secs(60), 2.0);
//! let now = Duration::ZERO;
//! assert!(timer.is_ready(now));
//! timer.fire(now);
//! assert!(!timer.is_ready(Duration::from_secs(59)));
//! assert!(timer.is_ready(Duration::from_secs(60)));
//! ```

use std::time::Duration;

/// Geometric backoff gate.
///
/// A fresh timer is ready immediately (`next_fire_time = 0`). Each
/// [`fire`](Self::fire) sets `next_fire_time = now + current_delay` and then
/// multiplies `current_delay` by the multiplier, so after `n` fires the gap
/// until the next ready time is `initial_delay * multiplier^n`.
///
/// The delay is unbounded unless a cap is configured with
/// [`with_max_delay`](Self::with_max_delay).
#[derive(Debug, Clone)]
pub struct ExponentialTimer {
    initial_delay: Duration,
    multiplier: f64,
    next_fire_time: Duration,
    current_delay: Duration,
    max_delay: Option<Duration>,
}

impl ExponentialTimer {
    /// Create a timer that is ready to fire right away.
    ///
    /// Multipliers below 1 are raised to 1 so the delay never shrinks.
    pub fn new(initial_delay: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        Self {
            initial_delay,
            multiplier,
            next_fire_time: Duration::ZERO,
            current_delay: initial_delay,
            max_delay: None,
        }
    }

    /// Cap the delay between fires. Not used by the client's own timers.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self.current_delay = self.current_delay.min(max);
        self
    }

    #[inline]
    pub fn is_ready(&self, now: Duration) -> bool {
        self.next_fire_time <= now
    }

    /// Fire the timer, scheduling its next ready time.
    ///
    /// # Panics
    ///
    /// Firing a timer that is not ready is a caller bug.
    pub fn fire(&mut self, now: Duration) {
        assert!(
            self.is_ready(now),
            "fired an exponential timer before it was ready (ready at {:?}, now {:?})",
            self.next_fire_time,
            now
        );
        self.next_fire_time = now.saturating_add(self.current_delay);
        let grown = Duration::try_from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX);
        self.current_delay = match self.max_delay {
            Some(max) => grown.min(max),
            None => grown,
        };
        tracing::trace!(
            next_fire_secs = self.next_fire_time.as_secs(),
            next_delay_secs = self.current_delay.as_secs(),
            "Exponential timer fired"
        );
    }

    /// Restore the timer to its freshly constructed state.
    pub fn reset(&mut self) {
        self.next_fire_time = Duration::ZERO;
        self.current_delay = match self.max_delay {
            Some(max) => self.initial_delay.min(max),
            None => self.initial_delay,
        };
    }

    /// When the timer becomes ready next.
    #[inline]
    pub fn next_fire_time(&self) -> Duration {
        self.next_fire_time
    }

    /// Delay that the next [`fire`](Self::fire) will schedule.
    #[inline]
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}
