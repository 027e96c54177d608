//! Light-client wallet synchronisation
//!
//! This crate keeps a CryptoNote-style wallet in step with a remote daemon it
//! does not trust. Blocks are downloaded, scanned for outputs belonging to the
//! wallet's keys and applied to the wallet state. Chain reorganisations are
//! detected and rolled back, and foreground callers can query balances or
//! send while a sync is running.
//!
//! ## Layout
//!
//! - [`scanning`]: daemon access, the sync cursor, the block queue and the
//!   two-stage [`WalletSynchronizer`]
//! - [`wallet`]: per-address ledgers, balances, transfers, persistence and
//!   the [`WalletBackend`] facade
//! - [`events`]: `Synced` and `Transaction` notifications toward the UI
//! - [`crypto`] and [`data_structures`]: keys, one-time key algebra, blocks
//!   and transactions
//!
//! ## Features
//!
//! - `http` (default): [`scanning::HttpDaemon`], a blocking JSON client
//! - `parallel`: scan the transactions of a block on the rayon pool
//! - `cli`: the `wallet_sync` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lightweight_wallet_sync::scanning::MockDaemon;
//! use lightweight_wallet_sync::WalletBackend;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let wallet = WalletBackend::builder()
//!     .with_daemon(Arc::new(MockDaemon::with_chain(0, 100)))
//!     .generate_new()
//!     .build()?;
//! wallet.start()?;
//! let (unlocked, locked) = wallet.balance()?;
//! println!("{unlocked} unlocked, {locked} locked");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod data_structures;
pub mod errors;
pub mod events;
pub mod scanning;
pub mod wallet;

pub use config::{NetworkParameters, SyncConfig};
pub use errors::*;
pub use events::{EventListener, WalletEvent};
pub use scanning::{DaemonProxy, SyncStatus, WalletSynchronizer};
pub use wallet::{
    SubWallets, TransactionSigner, TransferRequest, WalletBackend, WalletBackendBuilder,
    WalletState,
};
