//! Mock event listener for tests
//!
//! Captures every event it receives behind an `Arc<Mutex<_>>` so a test can
//! keep a handle after the listener is moved into the dispatcher.
//!
//! ```rust
//! use lightweight_wallet_sync::events::{EventDispatcher, WalletEvent};
//! use lightweight_wallet_sync::events::listeners::MockEventListener;
//!
//! let mut dispatcher = EventDispatcher::new().unwrap();
//! let mock = MockEventListener::new();
//! let captured = mock.captured();
//! dispatcher.register(Box::new(mock)).unwrap();
//!
//! dispatcher.emitter().emit(WalletEvent::Synced { height: 10 });
//! dispatcher.shutdown();
//! assert_eq!(captured.lock().len(), 1);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::listener::{EventListener, ListenerResult};
use crate::events::types::WalletEvent;

pub type CapturedEvents = Arc<Mutex<Vec<WalletEvent>>>;

#[derive(Debug, Default)]
pub struct MockEventListener {
    captured: CapturedEvents,
    delay: Option<Duration>,
    name: Option<&'static str>,
}

impl MockEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered under a custom name, so several mocks can coexist
    pub fn named(name: &'static str) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    /// Simulate a slow subscriber
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn captured(&self) -> CapturedEvents {
        Arc::clone(&self.captured)
    }

    /// Poll `events` until `predicate` holds or `timeout` passes
    pub fn wait_for(
        events: &CapturedEvents,
        timeout: Duration,
        predicate: impl Fn(&[WalletEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&events.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl EventListener for MockEventListener {
    fn handle_event(&mut self, event: &WalletEvent) -> ListenerResult {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.captured.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name.unwrap_or("mock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_events() {
        let mut mock = MockEventListener::named("first");
        let captured = mock.captured();
        mock.handle_event(&WalletEvent::Synced { height: 3 }).unwrap();

        assert_eq!(mock.name(), "first");
        assert!(MockEventListener::wait_for(&captured, Duration::from_millis(10), |events| {
            events == [WalletEvent::Synced { height: 3 }]
        }));
    }
}
