//! Built-in event listeners
//!
//! - [`LoggingListener`]: writes every event to the `tracing` log
//! - [`MockEventListener`]: captures events for assertions in tests

pub mod logging_listener;
pub mod mock_listener;

pub use logging_listener::LoggingListener;
pub use mock_listener::MockEventListener;
