//! Periodic flush timer abstraction.
//!
//! The client does not own a clock; it consumes a [`TimerFactory`] that
//! turns an interval and a tick closure into a running
//! [`PeriodicTimer`]. The default factory spawns a tokio interval task.
//! Tests inject their own factory (or none) to control time.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// The closure invoked on every timer tick.
pub type TickFn = Arc<dyn Fn() + Send + Sync>;

/// A running periodic timer; dropping or stopping it cancels the ticks.
pub trait PeriodicTimer: Send + Sync {
    /// Cancels the timer. Idempotent.
    fn stop(&self);
}

/// Creates a periodic timer firing `tick` every `interval`.
pub type TimerFactory =
    Arc<dyn Fn(Duration, TickFn) -> Box<dyn PeriodicTimer> + Send + Sync>;

/// A [`PeriodicTimer`] backed by a spawned tokio interval task.
struct TokioPeriodicTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTimer for TokioPeriodicTimer {
    fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for TokioPeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The default timer factory.
///
/// Must be invoked inside a tokio runtime; the returned timer ticks
/// until stopped or dropped. The first tick fires one full interval
/// after creation, not immediately.
#[must_use]
pub fn tokio_timer_factory() -> TimerFactory {
    Arc::new(|interval, tick| {
        let handle = tokio::spawn(async move {
            let mut clock = tokio::time::interval(interval);
            // Consume the immediate first tick so ticks align to
            // interval boundaries.
            clock.tick().await;
            loop {
                clock.tick().await;
                tick();
            }
        });
        Box::new(TokioPeriodicTimer { handle: Mutex::new(Some(handle)) })
    })
}
