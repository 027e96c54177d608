//! Mock daemon for deterministic testing
//!
//! [`MockDaemon`] keeps an in-memory chain and answers the [`DaemonProxy`]
//! calls the way a real node would: it resumes from the first checkpoint hash
//! it recognises, returns blocks in bounded batches and reports transaction
//! status from its pool and chain. Failure modes make the next matching call
//! fail and reset after use. Helpers at the bottom build transactions paying
//! to a given address.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::daemon::{DaemonInfo, DaemonProxy, NodeFee, TransactionsStatus};
use crate::config::NetworkParameters;
use crate::crypto::{derive_public_key, generate_key_derivation, generate_keys};
use crate::data_structures::{
    Address, Hash, KeyInput, KeyOutput, PublicKey, RawCoinbaseTransaction, RawTransaction,
    WalletBlock,
};
use crate::errors::{DaemonError, DaemonResult};

/// Simulated network failures
#[derive(Debug, Clone, Default)]
pub struct MockNetworkFailureModes {
    /// Fail this many upcoming sync data calls
    pub sync_data_failures: u32,
    pub fail_get_info: bool,
    pub fail_transactions_status: bool,
    pub fail_global_indexes: bool,
    /// Connection error on the next send
    pub fail_send: bool,
    /// The daemon answers but refuses the next send
    pub reject_send: bool,
    /// Error message used for the next failure of any kind
    pub next_error_message: Option<String>,
}

/// Arguments of one sync data request, recorded for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub checkpoints: Vec<Hash>,
    pub start_height: u64,
    pub start_timestamp: u64,
}

#[derive(Debug)]
struct MockChainState {
    blocks: BTreeMap<u64, WalletBlock>,
    batch_size: usize,
    local_height_override: Option<u64>,
    network_height_override: Option<u64>,
    in_pool: HashSet<Hash>,
    fee: NodeFee,
    global_indexes: HashMap<Hash, Vec<u64>>,
    sent_transactions: Vec<String>,
    sync_requests: Vec<SyncRequest>,
    info_requests: usize,
    status_requests: usize,
    failure_modes: MockNetworkFailureModes,
    fork_tag: u8,
}

/// In-memory daemon. Clones share the same chain.
#[derive(Debug, Clone)]
pub struct MockDaemon {
    state: Arc<Mutex<MockChainState>>,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic hash for a block on a given branch
pub fn mock_block_hash(height: u64, branch: u8) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[8] = branch;
    bytes[31] = 0xb1;
    Hash::from_bytes(bytes)
}

/// Deterministic transaction hash
pub fn mock_transaction_hash(seed: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[31] = 0x7a;
    Hash::from_bytes(bytes)
}

fn empty_block(height: u64, branch: u8, previous: Option<Hash>) -> WalletBlock {
    let network = NetworkParameters::default();
    let (tx_key, _) = generate_keys();
    WalletBlock {
        coinbase_transaction: RawCoinbaseTransaction {
            key_outputs: Vec::new(),
            hash: mock_transaction_hash(height << 8 | u64::from(branch)),
            transaction_public_key: tx_key,
            unlock_time: 0,
        },
        transactions: Vec::new(),
        block_height: height,
        block_hash: mock_block_hash(height, branch),
        block_timestamp: network.scan_height_to_timestamp(height),
        previous_block_hash: previous,
    }
}

impl MockDaemon {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState {
                blocks: BTreeMap::new(),
                batch_size: 100,
                local_height_override: None,
                network_height_override: None,
                in_pool: HashSet::new(),
                fee: NodeFee::default(),
                global_indexes: HashMap::new(),
                sent_transactions: Vec::new(),
                sync_requests: Vec::new(),
                info_requests: 0,
                status_requests: 0,
                failure_modes: MockNetworkFailureModes::default(),
                fork_tag: 0,
            })),
        }
    }

    /// Daemon holding empty blocks `start..=end`
    pub fn with_chain(start: u64, end: u64) -> Self {
        let daemon = Self::new();
        {
            let mut state = daemon.state.lock();
            for height in start..=end {
                let previous = state.blocks.get(&height.wrapping_sub(1)).map(|b| b.block_hash);
                state.blocks.insert(height, empty_block(height, 0, previous));
            }
        }
        daemon
    }

    /// Append `count` empty blocks to the top of the chain
    pub fn extend_chain(&self, count: u64) {
        let mut state = self.state.lock();
        let branch = state.fork_tag;
        let (next, previous) = match state.blocks.last_key_value() {
            Some((height, block)) => (height + 1, Some(block.block_hash)),
            None => (1, None),
        };
        let mut previous = previous;
        for height in next..next + count {
            let block = empty_block(height, branch, previous);
            previous = Some(block.block_hash);
            state.blocks.insert(height, block);
        }
    }

    /// Replace every block from `fork_height` upwards with blocks from a new
    /// branch, keeping the chain at least as tall as before
    pub fn fork_from(&self, fork_height: u64, extra_blocks: u64) {
        let mut state = self.state.lock();
        state.fork_tag = state.fork_tag.wrapping_add(1);
        let branch = state.fork_tag;
        let top = state.blocks.last_key_value().map_or(0, |(h, _)| *h);
        let mut previous = state
            .blocks
            .get(&fork_height.wrapping_sub(1))
            .map(|b| b.block_hash);
        for height in fork_height..=top + extra_blocks {
            let block = empty_block(height, branch, previous);
            previous = Some(block.block_hash);
            state.blocks.insert(height, block);
        }
    }

    /// Insert or replace a block as is
    pub fn put_block(&self, block: WalletBlock) {
        self.state.lock().blocks.insert(block.block_height, block);
    }

    /// Add a transaction to an existing block
    pub fn add_transaction(&self, height: u64, transaction: RawTransaction) {
        if let Some(block) = self.state.lock().blocks.get_mut(&height) {
            block.transactions.push(transaction);
        }
    }

    pub fn set_coinbase(&self, height: u64, coinbase: RawCoinbaseTransaction) {
        if let Some(block) = self.state.lock().blocks.get_mut(&height) {
            block.coinbase_transaction = coinbase;
        }
    }

    pub fn block(&self, height: u64) -> Option<WalletBlock> {
        self.state.lock().blocks.get(&height).cloned()
    }

    pub fn top_height(&self) -> u64 {
        self.state.lock().blocks.last_key_value().map_or(0, |(h, _)| *h)
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.state.lock().batch_size = batch_size.max(1);
    }

    pub fn set_local_height(&self, height: Option<u64>) {
        self.state.lock().local_height_override = height;
    }

    pub fn set_network_height(&self, height: Option<u64>) {
        self.state.lock().network_height_override = height;
    }

    pub fn set_node_fee(&self, fee: NodeFee) {
        self.state.lock().fee = fee;
    }

    pub fn add_to_pool(&self, hash: Hash) {
        self.state.lock().in_pool.insert(hash);
    }

    pub fn remove_from_pool(&self, hash: &Hash) {
        self.state.lock().in_pool.remove(hash);
    }

    pub fn set_global_indexes(&self, hash: Hash, indexes: Vec<u64>) {
        self.state.lock().global_indexes.insert(hash, indexes);
    }

    pub fn set_failure_modes(&self, modes: MockNetworkFailureModes) {
        self.state.lock().failure_modes = modes;
    }

    pub fn sync_requests(&self) -> Vec<SyncRequest> {
        self.state.lock().sync_requests.clone()
    }

    pub fn info_requests(&self) -> usize {
        self.state.lock().info_requests
    }

    pub fn status_requests(&self) -> usize {
        self.state.lock().status_requests
    }

    pub fn sent_transactions(&self) -> Vec<String> {
        self.state.lock().sent_transactions.clone()
    }

    fn failure(modes: &mut MockNetworkFailureModes, operation: &str) -> DaemonError {
        let message = modes
            .next_error_message
            .take()
            .unwrap_or_else(|| format!("Mock failure: {operation}"));
        DaemonError::ConnectionFailed(message)
    }
}

impl MockChainState {
    fn local_height(&self) -> u64 {
        let top = self.blocks.last_key_value().map_or(0, |(h, _)| *h);
        self.local_height_override.unwrap_or(top).min(top)
    }

    fn height_of(&self, hash: &Hash) -> Option<u64> {
        self.blocks
            .values()
            .find(|block| block.block_hash == *hash)
            .map(|block| block.block_height)
    }

    fn contains_transaction(&self, hash: &Hash) -> bool {
        self.blocks.values().any(|block| {
            block.coinbase_transaction.hash == *hash
                || block.transactions.iter().any(|tx| tx.hash == *hash)
        })
    }
}

impl DaemonProxy for MockDaemon {
    fn get_wallet_sync_data(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
    ) -> DaemonResult<Vec<WalletBlock>> {
        let mut state = self.state.lock();
        state.sync_requests.push(SyncRequest {
            checkpoints: checkpoints.to_vec(),
            start_height,
            start_timestamp,
        });

        if state.failure_modes.sync_data_failures > 0 {
            state.failure_modes.sync_data_failures -= 1;
            return Err(Self::failure(&mut state.failure_modes, "get_wallet_sync_data"));
        }

        let known = checkpoints
            .iter()
            .find_map(|hash| state.height_of(hash))
            .map(|height| height + 1);

        let start = match known {
            Some(height) => height,
            None if start_timestamp != 0 => state
                .blocks
                .values()
                .find(|block| block.block_timestamp >= start_timestamp)
                .map_or(u64::MAX, |block| block.block_height),
            None => start_height,
        };

        let local = state.local_height();
        Ok(state
            .blocks
            .range(start..)
            .take_while(|(height, _)| **height <= local)
            .take(state.batch_size)
            .map(|(_, block)| block.clone())
            .collect())
    }

    fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> DaemonResult<HashMap<Hash, Vec<u64>>> {
        let mut state = self.state.lock();
        if state.failure_modes.fail_global_indexes {
            state.failure_modes.fail_global_indexes = false;
            return Err(Self::failure(&mut state.failure_modes, "get_global_indexes_for_range"));
        }

        let mut result = HashMap::new();
        if start_height >= end_height {
            return Ok(result);
        }
        for (height, block) in state.blocks.range(start_height..end_height) {
            let coinbase = &block.coinbase_transaction;
            let transactions = std::iter::once((coinbase.hash, coinbase.key_outputs.len()))
                .chain(block.transactions.iter().map(|tx| (tx.hash, tx.key_outputs.len())));
            for (position, (hash, outputs)) in transactions.enumerate() {
                let indexes = state.global_indexes.get(&hash).cloned().unwrap_or_else(|| {
                    let base = height * 10_000 + position as u64 * 100;
                    (0..outputs as u64).map(|i| base + i).collect()
                });
                result.insert(hash, indexes);
            }
        }
        Ok(result)
    }

    fn get_transactions_status(&self, hashes: &HashSet<Hash>) -> DaemonResult<TransactionsStatus> {
        let mut state = self.state.lock();
        state.status_requests += 1;
        if state.failure_modes.fail_transactions_status {
            state.failure_modes.fail_transactions_status = false;
            return Err(Self::failure(&mut state.failure_modes, "get_transactions_status"));
        }

        let mut status = TransactionsStatus::default();
        for hash in hashes {
            if state.in_pool.contains(hash) {
                status.in_pool.insert(*hash);
            } else if state.contains_transaction(hash) {
                status.in_block.insert(*hash);
            } else {
                status.unknown.insert(*hash);
            }
        }
        Ok(status)
    }

    fn send_transaction(&self, raw_transaction: &str) -> DaemonResult<bool> {
        let mut state = self.state.lock();
        if state.failure_modes.fail_send {
            state.failure_modes.fail_send = false;
            return Err(Self::failure(&mut state.failure_modes, "send_transaction"));
        }
        if state.failure_modes.reject_send {
            state.failure_modes.reject_send = false;
            return Ok(false);
        }
        state.sent_transactions.push(raw_transaction.to_string());
        Ok(true)
    }

    fn get_daemon_info(&self) -> DaemonResult<DaemonInfo> {
        let mut state = self.state.lock();
        state.info_requests += 1;
        if state.failure_modes.fail_get_info {
            state.failure_modes.fail_get_info = false;
            return Err(Self::failure(&mut state.failure_modes, "get_daemon_info"));
        }

        let local_height = state.local_height();
        let top = state.blocks.last_key_value().map_or(0, |(h, _)| *h);
        Ok(DaemonInfo {
            local_height,
            network_height: state.network_height_override.unwrap_or(top),
            peer_count: 8,
            hashrate: 1_000,
        })
    }

    fn get_fee_info(&self) -> DaemonResult<NodeFee> {
        Ok(self.state.lock().fee.clone())
    }
}

/// Build a transaction paying `amount` to each `(address, amount)` pair.
///
/// Returns the transaction; output `i` pays `recipients[i]`.
pub fn mock_payment(
    hash: Hash,
    recipients: &[(&Address, u64)],
    unlock_time: u64,
    inputs: Vec<KeyInput>,
) -> RawTransaction {
    let (transaction_public_key, key_outputs) = mock_outputs(recipients);
    RawTransaction {
        key_outputs,
        hash,
        transaction_public_key,
        unlock_time,
        payment_id: String::new(),
        key_inputs: inputs,
    }
}

/// Build a coinbase transaction paying `amount` to `address`
pub fn mock_coinbase(hash: Hash, address: &Address, amount: u64, unlock_time: u64) -> RawCoinbaseTransaction {
    let (transaction_public_key, key_outputs) = mock_outputs(&[(address, amount)]);
    RawCoinbaseTransaction {
        key_outputs,
        hash,
        transaction_public_key,
        unlock_time,
    }
}

fn mock_outputs(recipients: &[(&Address, u64)]) -> (PublicKey, Vec<KeyOutput>) {
    let (transaction_public_key, transaction_secret_key) = generate_keys();
    let outputs = recipients
        .iter()
        .enumerate()
        .map(|(index, (address, amount))| {
            let key = generate_key_derivation(&address.public_view_key, &transaction_secret_key)
                .and_then(|derivation| {
                    derive_public_key(&derivation, index as u64, &address.public_spend_key)
                })
                .unwrap_or_default();
            KeyOutput {
                key,
                amount: *amount,
                global_output_index: None,
            }
        })
        .collect();
    (transaction_public_key, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumes_from_known_checkpoint() {
        let daemon = MockDaemon::with_chain(1, 50);
        daemon.set_batch_size(10);

        let blocks = daemon
            .get_wallet_sync_data(&[mock_block_hash(20, 0)], 0, 0)
            .unwrap();
        assert_eq!(blocks.len(), 10);
        assert_eq!(blocks[0].block_height, 21);
        assert_eq!(blocks[0].previous_block_hash, Some(mock_block_hash(20, 0)));
    }

    #[test]
    fn test_unknown_checkpoints_fall_back_to_start_height() {
        let daemon = MockDaemon::with_chain(1, 50);
        let blocks = daemon
            .get_wallet_sync_data(&[mock_block_hash(20, 9)], 45, 0)
            .unwrap();
        assert_eq!(blocks.first().map(|b| b.block_height), Some(45));
        assert_eq!(blocks.len(), 6);
    }

    #[test]
    fn test_timestamp_start() {
        let daemon = MockDaemon::with_chain(1, 50);
        let network = NetworkParameters::default();
        let blocks = daemon
            .get_wallet_sync_data(&[], 0, network.scan_height_to_timestamp(30))
            .unwrap();
        assert_eq!(blocks[0].block_height, 30);
    }

    #[test]
    fn test_local_height_caps_returned_blocks() {
        let daemon = MockDaemon::with_chain(1, 50);
        daemon.set_local_height(Some(25));
        let blocks = daemon.get_wallet_sync_data(&[], 1, 0).unwrap();
        assert_eq!(blocks.last().map(|b| b.block_height), Some(25));
    }

    #[test]
    fn test_fork_replaces_branch() {
        let daemon = MockDaemon::with_chain(1, 30);
        daemon.fork_from(25, 2);

        assert_eq!(daemon.top_height(), 32);
        assert_eq!(daemon.block(24).unwrap().block_hash, mock_block_hash(24, 0));
        assert_eq!(daemon.block(25).unwrap().block_hash, mock_block_hash(25, 1));
        assert_eq!(
            daemon.block(25).unwrap().previous_block_hash,
            Some(mock_block_hash(24, 0))
        );

        // Our old tip is unknown now, so the daemon resumes after 24
        let blocks = daemon
            .get_wallet_sync_data(&[mock_block_hash(30, 0), mock_block_hash(24, 0)], 0, 0)
            .unwrap();
        assert_eq!(blocks[0].block_height, 25);
    }

    #[test]
    fn test_failure_modes_reset_after_use() {
        let daemon = MockDaemon::with_chain(1, 5);
        daemon.set_failure_modes(MockNetworkFailureModes {
            sync_data_failures: 1,
            next_error_message: Some("boom".into()),
            ..Default::default()
        });

        let error = daemon.get_wallet_sync_data(&[], 1, 0).unwrap_err();
        assert_eq!(error, DaemonError::ConnectionFailed("boom".into()));
        assert!(daemon.get_wallet_sync_data(&[], 1, 0).is_ok());
        assert_eq!(daemon.sync_requests().len(), 2);
    }

    #[test]
    fn test_transactions_status() {
        let daemon = MockDaemon::with_chain(1, 5);
        let pooled = mock_transaction_hash(1);
        let mined = daemon.block(3).unwrap().coinbase_transaction.hash;
        let dropped = mock_transaction_hash(2);
        daemon.add_to_pool(pooled);

        let status = daemon
            .get_transactions_status(&[pooled, mined, dropped].into_iter().collect())
            .unwrap();
        assert!(status.in_pool.contains(&pooled));
        assert!(status.in_block.contains(&mined));
        assert!(status.unknown.contains(&dropped));
    }
}
