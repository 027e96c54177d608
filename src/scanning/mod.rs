//! Blockchain synchronisation
//!
//! This module contains everything between the daemon and the wallet state:
//!
//! - [`DaemonProxy`]: the calls the engine makes to a remote node, with an
//!   HTTP implementation ([`HttpDaemon`], `http` feature) and an in-memory
//!   one for tests ([`MockDaemon`])
//! - [`SyncStatus`]: the cursor of recent hashes and checkpoints used to
//!   resume syncing and to detect forks
//! - [`BlockQueue`]: bounded queue between the download and process stages
//! - [`WalletSynchronizer`]: the engine driving both stages
//! - [`DaemonStatus`]: cached daemon heights, refreshed by a helper thread

pub mod block_queue;
pub mod block_scanner;
pub mod cancellation;
pub mod daemon;
pub mod daemon_status;
#[cfg(feature = "http")]
pub mod http_daemon;
pub mod mocks;
pub mod sync_status;
pub mod synchronizer;

pub use block_queue::BlockQueue;
pub use block_scanner::{scan_block, ScanKeys};
pub use cancellation::{AtomicCancellationToken, CancellationToken};
pub use daemon::{DaemonInfo, DaemonProxy, NodeFee, TransactionsStatus};
pub use daemon_status::{DaemonStatus, DaemonStatusPoller};
#[cfg(feature = "http")]
pub use http_daemon::HttpDaemon;
pub use mocks::{MockDaemon, MockNetworkFailureModes};
pub use sync_status::SyncStatus;
pub use synchronizer::{detect_fork, SyncItem, WalletSynchronizer};
