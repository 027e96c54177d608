//! Configuration for the synchronisation engine and the network it talks to
//!
//! [`SyncConfig`] holds the tunables of the engine (queue capacity, backoff,
//! poll intervals). [`NetworkParameters`] holds the chain constants the wallet
//! needs for unlock rules, address validation and sync-start conversion.
//! Both deserialize from JSON with every field optional, so a config file only
//! has to name what it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

/// Number of most recent block hashes kept for fork resolution
pub const LAST_KNOWN_BLOCK_HASHES_SIZE: usize = 100;

/// A checkpoint hash is kept every this many blocks
pub const BLOCK_HASH_CHECKPOINTS_INTERVAL: u64 = 5000;

/// Default capacity of the download -> process queue
pub const MAXIMUM_SYNC_QUEUE_SIZE: usize = 1000;

/// Chain constants used by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParameters {
    /// Unlock times at or above this value are unix timestamps, below it block heights
    pub max_block_number: u64,
    /// Slack in blocks when testing a height based unlock time
    pub locked_tx_allowed_delta_blocks: u64,
    /// Slack in seconds when testing a timestamp based unlock time
    pub locked_tx_allowed_delta_seconds: u64,
    /// Target seconds between blocks
    pub difficulty_target: u64,
    pub genesis_block_timestamp: u64,
    /// How far in the future a block timestamp may be
    pub block_future_time_limit: u64,
    /// Base58 address prefix, encoded as a varint in front of the keys
    pub address_prefix: u64,
    pub minimum_fee: u64,
    pub minimum_mixin: u64,
    pub maximum_mixin: u64,
    pub default_mixin: u64,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            max_block_number: 500_000_000,
            locked_tx_allowed_delta_blocks: 1,
            locked_tx_allowed_delta_seconds: 30,
            difficulty_target: 30,
            genesis_block_timestamp: 1_512_800_692,
            block_future_time_limit: 60 * 60 * 2,
            address_prefix: 3_914_525,
            minimum_fee: 10,
            minimum_mixin: 0,
            maximum_mixin: 7,
            default_mixin: 3,
        }
    }
}

impl NetworkParameters {
    /// Approximate block height for a unix timestamp, used to turn a
    /// timestamp based sync start into a height
    pub fn timestamp_to_scan_height(&self, timestamp: u64) -> u64 {
        if timestamp == 0 {
            return 0;
        }

        timestamp.saturating_sub(self.genesis_block_timestamp) / self.difficulty_target
    }

    /// Approximate unix timestamp of a block height
    pub fn scan_height_to_timestamp(&self, height: u64) -> u64 {
        if height == 0 {
            return 0;
        }

        self.genesis_block_timestamp + height * self.difficulty_target
    }

    /// Current time minus the allowed block future time, so a fresh wallet
    /// never asks for blocks past what the network can have produced
    pub fn current_timestamp_adjusted(&self) -> u64 {
        crate::wallet::unlock::unix_now().saturating_sub(self.block_future_time_limit)
    }
}

/// Tunables of the synchronisation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the bounded block queue
    pub queue_capacity: usize,
    /// Size of the recent block hash ring in the sync cursor
    pub recent_hashes_capacity: usize,
    /// Interval between checkpoint hashes in the sync cursor
    pub checkpoint_interval: u64,
    /// First retry delay after a daemon failure
    pub retry_backoff_initial_ms: u64,
    /// Upper bound of the retry delay
    pub retry_backoff_max_ms: u64,
    /// Pause between requests once no new blocks are returned
    pub synced_sleep_ms: u64,
    /// Interval between daemon status refreshes
    pub daemon_poll_interval_ms: u64,
    /// Width of the window used to hide which block we fetch global indexes for
    pub global_indexes_obscurity: u64,
    /// Scan coinbase transactions for owned outputs
    pub process_coinbase_transactions: bool,
    pub network: NetworkParameters,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: MAXIMUM_SYNC_QUEUE_SIZE,
            recent_hashes_capacity: LAST_KNOWN_BLOCK_HASHES_SIZE,
            checkpoint_interval: BLOCK_HASH_CHECKPOINTS_INTERVAL,
            retry_backoff_initial_ms: 1_000,
            retry_backoff_max_ms: 8_000,
            synced_sleep_ms: 5_000,
            daemon_poll_interval_ms: 10_000,
            global_indexes_obscurity: 10,
            process_coinbase_transactions: true,
            network: NetworkParameters::default(),
        }
    }
}

impl SyncConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> WalletResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> WalletResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> WalletResult<()> {
        if self.queue_capacity == 0 {
            return Err(WalletError::Serialization(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.recent_hashes_capacity == 0 || self.checkpoint_interval == 0 {
            return Err(WalletError::Serialization(
                "recent_hashes_capacity and checkpoint_interval must be non-zero".to_string(),
            ));
        }
        if self.network.minimum_mixin > self.network.maximum_mixin {
            return Err(WalletError::Serialization(
                "minimum_mixin is above maximum_mixin".to_string(),
            ));
        }
        Ok(())
    }

    /// Fast timings for tests driving the engine against a mock daemon
    pub fn for_testing() -> Self {
        Self {
            retry_backoff_initial_ms: 10,
            retry_backoff_max_ms: 40,
            synced_sleep_ms: 20,
            daemon_poll_interval_ms: 50,
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_process_coinbase(mut self, process: bool) -> Self {
        self.process_coinbase_transactions = process;
        self
    }

    pub fn with_network(mut self, network: NetworkParameters) -> Self {
        self.network = network;
        self
    }

    pub fn retry_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_initial_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn synced_sleep(&self) -> Duration {
        Duration::from_millis(self.synced_sleep_ms)
    }

    pub fn daemon_poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon_poll_interval_ms)
    }
}
