//! Event listener trait and the dispatcher thread that drives listeners
//!
//! Emitting an event only pushes it onto a channel. A dedicated dispatch
//! thread delivers it to every registered listener in registration order, so
//! a slow or failing listener never blocks the process stage. Listener errors
//! are logged and counted, and never reach the emitter or other listeners.

use std::error::Error;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use super::types::WalletEvent;

pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Receiver of wallet events
pub trait EventListener: Send {
    fn handle_event(&mut self, event: &WalletEvent) -> ListenerResult;

    /// Unique name, used for registration and logging
    fn name(&self) -> &'static str;

    /// Skip events this listener does not care about
    fn wants_event(&self, _event: &WalletEvent) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum EventDispatcherError {
    #[error("Listener with name '{0}' is already registered")]
    DuplicateListener(String),

    #[error("Invalid listener name: '{0}'")]
    InvalidListenerName(String),

    #[error("Failed to start event dispatch thread: {0}")]
    ThreadSpawn(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub events_dispatched: usize,
    pub listener_calls: usize,
    pub listener_errors: usize,
}

type ListenerList = Arc<Mutex<Vec<Box<dyn EventListener>>>>;

/// Cheap handle for emitting events; clones share the same dispatcher
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Sender<WalletEvent>,
}

impl EventEmitter {
    /// Queue an event for delivery. Never blocks.
    pub fn emit(&self, event: WalletEvent) {
        if self.sender.send(event).is_err() {
            debug!("Event dispatcher is shut down, dropping event");
        }
    }

    /// Emitter whose events go nowhere
    pub fn disconnected() -> Self {
        let (sender, _) = mpsc::channel();
        Self { sender }
    }
}

/// Owns the listeners and the dispatch thread
pub struct EventDispatcher {
    listeners: ListenerList,
    stats: Arc<Mutex<DispatchStats>>,
    sender: Option<Sender<WalletEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_names())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl EventDispatcher {
    /// Start the dispatch thread
    pub fn new() -> Result<Self, EventDispatcherError> {
        let listeners: ListenerList = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Mutex::new(DispatchStats::default()));
        let (sender, receiver) = mpsc::channel();

        let handle = {
            let listeners = Arc::clone(&listeners);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("wallet-events".to_string())
                .spawn(move || dispatch_loop(receiver, listeners, stats))
                .map_err(|e| EventDispatcherError::ThreadSpawn(e.to_string()))?
        };

        Ok(Self {
            listeners,
            stats,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn register(&self, listener: Box<dyn EventListener>) -> Result<(), EventDispatcherError> {
        let name = listener.name();
        if name.trim().is_empty() {
            return Err(EventDispatcherError::InvalidListenerName(name.to_string()));
        }

        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| l.name() == name) {
            return Err(EventDispatcherError::DuplicateListener(name.to_string()));
        }
        debug!(listener = name, "Registered event listener");
        listeners.push(listener);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.lock().iter().map(|l| l.name()).collect()
    }

    pub fn emitter(&self) -> EventEmitter {
        match &self.sender {
            Some(sender) => EventEmitter {
                sender: sender.clone(),
            },
            None => EventEmitter::disconnected(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    /// Deliver everything already queued, then stop the dispatch thread.
    ///
    /// Emitters handed out earlier keep the channel open, so the thread only
    /// exits once they are dropped as well.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Event dispatch thread panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        // Detach rather than join: outstanding emitters may keep the thread alive
        self.sender.take();
        self.handle.take();
    }
}

fn dispatch_loop(
    receiver: Receiver<WalletEvent>,
    listeners: ListenerList,
    stats: Arc<Mutex<DispatchStats>>,
) {
    for event in receiver {
        let mut calls = 0;
        let mut errors = 0;
        {
            let mut listeners = listeners.lock();
            for listener in listeners.iter_mut() {
                if !listener.wants_event(&event) {
                    continue;
                }
                calls += 1;
                if let Err(e) = listener.handle_event(&event) {
                    errors += 1;
                    warn!(
                        listener = listener.name(),
                        event = event.event_type(),
                        error = %e,
                        "Event listener failed"
                    );
                }
            }
        }

        let mut stats = stats.lock();
        stats.events_dispatched += 1;
        stats.listener_calls += calls;
        stats.listener_errors += errors;
    }
    debug!("Event dispatch thread exiting");
}
