//! Stop flag shared between the engine and its worker threads
//!
//! Worker threads check the flag between units of work. A thread sleeping on
//! the token is woken the moment it is cancelled. Threads blocked on the block
//! queue are woken by the queue itself, not by this flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Common interface for stop flags
pub trait CancellationToken: Send + Sync + std::fmt::Debug {
    fn is_cancelled(&self) -> bool;

    fn cancel(&self);

    /// Clear the flag so the token can be reused for the next run
    fn reset(&self);

    /// Sleep for `duration` or until cancelled, whichever comes first.
    ///
    /// Returns `false` if cancelled before the full duration elapsed.
    fn sleep_unless_cancelled(&self, duration: Duration) -> bool;
}

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cloneable flag; every clone observes the same state
#[derive(Debug, Clone, Default)]
pub struct AtomicCancellationToken {
    shared: Arc<Shared>,
}

impl AtomicCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CancellationToken for AtomicCancellationToken {
    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        // Set under the lock so a sleeper cannot miss the wakeup
        let guard = self.shared.lock.lock();
        self.shared.cancelled.store(true, Ordering::SeqCst);
        drop(guard);
        self.shared.wake.notify_all();
    }

    fn reset(&self) {
        self.shared.cancelled.store(false, Ordering::SeqCst);
    }

    fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.shared.lock.lock();
        while !self.is_cancelled() {
            if self.shared.wake.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_cancelled();
            }
        }
        false
    }
}
