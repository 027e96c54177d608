//! Contract between the sync engine and the remote node
//!
//! The engine consumes a [`DaemonProxy`]; it never implements node logic
//! itself. Calls are blocking and may be made from the download thread, the
//! status poller and the caller's thread at the same time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::data_structures::{Hash, WalletBlock};
use crate::errors::DaemonResult;

/// Where the daemon believes each queried transaction is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionsStatus {
    pub in_pool: HashSet<Hash>,
    pub in_block: HashSet<Hash>,
    /// Neither in the pool nor in a block: the transaction was dropped
    pub unknown: HashSet<Hash>,
}

/// Snapshot of the daemon's view of the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Top block height the daemon has locally
    pub local_height: u64,
    /// Top block height the daemon's peers report
    pub network_height: u64,
    pub peer_count: u64,
    pub hashrate: u64,
}

/// Convenience fee advertised by the daemon operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFee {
    pub amount: u64,
    pub address: String,
}

pub trait DaemonProxy: Send + Sync {
    /// Blocks following the first hash in `checkpoints` the daemon recognises.
    /// With no recognised hash it starts from `start_timestamp` if non-zero,
    /// else from `start_height`. An empty list means nothing new.
    fn get_wallet_sync_data(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
    ) -> DaemonResult<Vec<WalletBlock>>;

    /// Global output indexes of every transaction in `[start_height, end_height)`
    fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> DaemonResult<HashMap<Hash, Vec<u64>>>;

    fn get_transactions_status(&self, hashes: &HashSet<Hash>) -> DaemonResult<TransactionsStatus>;

    /// Relay a hex-encoded transaction.
    ///
    /// `Ok(false)` means the daemon answered and refused it; `Err` means the
    /// daemon could not be reached.
    fn send_transaction(&self, raw_transaction: &str) -> DaemonResult<bool>;

    fn get_daemon_info(&self) -> DaemonResult<DaemonInfo>;

    fn get_fee_info(&self) -> DaemonResult<NodeFee>;
}
