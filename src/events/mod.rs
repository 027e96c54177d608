//! Event system for wallet notifications
//!
//! The sync engine reports two things to the UI layer: that the wallet caught
//! up with the network ([`WalletEvent::Synced`]) and that a transaction
//! affecting it was confirmed ([`WalletEvent::Transaction`]). Both are
//! fire-and-forget.
//!
//! # Core Components
//!
//! - [`EventListener`]: implemented by subscribers
//! - [`EventDispatcher`]: owns the listeners and a dedicated delivery thread
//! - [`EventEmitter`]: cloneable handle the engine uses to queue events
//!
//! Listener failures are isolated: they are logged and counted but never
//! affect other listeners or the emitter.

pub mod listener;
pub mod listeners;
pub mod types;

pub use listener::{
    DispatchStats, EventDispatcher, EventDispatcherError, EventEmitter, EventListener,
    ListenerResult,
};
pub use types::WalletEvent;
