//! Bounded retry plumbing: sleep abstraction and cancellation.
//!
//! Every blocking wait in this crate is a bounded poll loop (check a flag,
//! sleep a fixed interval, decrement a budget). The sleep goes through the
//! [`Sleeper`] trait so tests can drive retries without wall-clock delay,
//! and every loop checks a [`CancelToken`] so a caller can abort waits that
//! would otherwise run to budget exhaustion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Suspends the calling context for a fixed interval.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Cooperative cancellation flag shared between the control loop and the
/// retry loops. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of all loops holding a clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of a bounded poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition became true within the budget.
    Ready,
    /// The attempt budget ran out.
    Exhausted,
    /// The cancel token fired before the condition became true.
    Cancelled,
}

/// Poll `condition` up to `attempts` times, sleeping `interval` after each
/// failed check. Attempts are strictly sequential; the sleeps are the only
/// suspension points.
pub fn poll_until<S: Sleeper>(
    attempts: u32,
    interval: Duration,
    sleeper: &S,
    cancel: &CancelToken,
    mut condition: impl FnMut() -> bool,
) -> PollOutcome {
    for _ in 0..attempts {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if condition() {
            return PollOutcome::Ready;
        }
        sleeper.sleep(interval);
    }
    if cancel.is_cancelled() {
        PollOutcome::Cancelled
    } else if condition() {
        PollOutcome::Ready
    } else {
        PollOutcome::Exhausted
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Route `log` output to the test harness. Safe to call from every
    /// test; only the first call installs the logger.
    pub fn init_test_logging() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .try_init()
            .ok();
    }

    /// Records requested sleep intervals instead of sleeping.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }

        pub fn sleep_count(&self) -> usize {
            self.slept.lock().unwrap().len()
        }
    }

    impl Sleeper for &RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }
}
