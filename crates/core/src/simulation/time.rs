//! Time abstraction layer for the guard simulation.
//!
//! This module provides:
//! - `TimeSource` trait for abstracting the clock read by clients and timers
//! - `RealTime` implementation backed by a monotonic `Instant`
//! - `VirtualTime` implementation for deterministic simulation
//!
//! Time sources are plain values threaded through constructors, so several
//! independent simulations (or unit tests) can run side by side, each with
//! its own clock.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Abstraction over the clock used by the guard selection logic.
///
/// Implementations must be monotonic: successive calls to [`TimeSource::now`]
/// never go backwards.
pub trait TimeSource: Clone {
    /// Returns the current time as nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;

    /// Returns the current time as a Duration since an arbitrary epoch.
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }
}

/// Wall-clock implementation, for running the client outside a simulation.
#[derive(Clone, Debug)]
pub struct RealTime {
    epoch: Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Virtual time implementation for deterministic simulation.
///
/// Time starts at zero and only advances when explicitly stepped via
/// `advance()`; it is never decreased. Clones share the
/// same underlying counter, so a driver and the client it drives observe
/// the same instant.
#[derive(Clone, Debug)]
pub struct VirtualTime {
    current_nanos: Arc<AtomicU64>,
}

impl Default for VirtualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTime {
    /// Creates a new virtual time starting at 0.
    pub fn new() -> Self {
        Self::with_initial_time(0)
    }

    /// Creates a new virtual time starting at the given nanoseconds.
    pub fn with_initial_time(initial_nanos: u64) -> Self {
        Self {
            current_nanos: Arc::new(AtomicU64::new(initial_nanos)),
        }
    }

    /// Advances time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let delta = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.current_nanos
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |now| {
                Some(now.saturating_add(delta))
            })
            .ok();
    }

    /// Advances time by a whole number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.current_nanos.load(AtomicOrdering::SeqCst)
    }
}
