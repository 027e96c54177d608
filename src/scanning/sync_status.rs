//! Sync cursor: how far the wallet has got, and which hashes to offer the
//! daemon so it can find where our chain and its chain agree.
//!
//! The cursor keeps the last [`LAST_KNOWN_BLOCK_HASHES_SIZE`] block hashes,
//! newest first, plus one checkpoint hash every
//! [`BLOCK_HASH_CHECKPOINTS_INTERVAL`] blocks, oldest first and never trimmed
//! during forward sync. Shallow forks resolve against the recent hashes; the
//! checkpoints bound the cost of a deep fork to `height / interval` hashes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{BLOCK_HASH_CHECKPOINTS_INTERVAL, LAST_KNOWN_BLOCK_HASHES_SIZE};
use crate::data_structures::Hash;
use crate::errors::{SyncError, SyncResult};

fn default_capacity() -> usize {
    LAST_KNOWN_BLOCK_HASHES_SIZE
}

fn default_interval() -> u64 {
    BLOCK_HASH_CHECKPOINTS_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// One hash per checkpoint interval, oldest first
    block_hash_checkpoints: Vec<Hash>,
    /// Most recent hashes, newest first
    last_known_block_hashes: VecDeque<Hash>,
    last_known_block_height: u64,
    #[serde(skip, default = "default_capacity")]
    recent_capacity: usize,
    #[serde(skip, default = "default_interval")]
    checkpoint_interval: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::with_limits(LAST_KNOWN_BLOCK_HASHES_SIZE, BLOCK_HASH_CHECKPOINTS_INTERVAL)
    }

    pub fn with_limits(recent_capacity: usize, checkpoint_interval: u64) -> Self {
        Self {
            block_hash_checkpoints: Vec::new(),
            last_known_block_hashes: VecDeque::with_capacity(recent_capacity + 1),
            last_known_block_height: 0,
            recent_capacity: recent_capacity.max(1),
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    /// Highest block height fully accounted for
    pub fn height(&self) -> u64 {
        self.last_known_block_height
    }

    /// Record a processed block.
    ///
    /// Forward progress must be gapless: once the cursor is non-zero, a block
    /// at any height other than `height + 1` means the source skipped blocks
    /// and the run must end.
    pub fn record_block(&mut self, hash: Hash, height: u64) -> SyncResult<()> {
        let current = self.last_known_block_height;
        if height > 0 && current != 0 && height != current + 1 {
            return Err(SyncError::BlocksMissed {
                expected: current + 1,
                received: height,
            });
        }

        self.last_known_block_height = height;

        if height % self.checkpoint_interval == 0 {
            self.block_hash_checkpoints.push(hash);
        }

        self.last_known_block_hashes.push_front(hash);
        if self.last_known_block_hashes.len() > self.recent_capacity {
            self.last_known_block_hashes.pop_back();
        }

        Ok(())
    }

    /// Hashes for the daemon to search, newest first.
    ///
    /// The daemon starts from the first hash it recognises, so the recent ring
    /// comes first and the checkpoints follow from the newest down.
    pub fn checkpoints_for_query(&self) -> Vec<Hash> {
        self.last_known_block_hashes
            .iter()
            .chain(self.block_hash_checkpoints.iter().rev())
            .copied()
            .collect()
    }

    /// Our hash at `height`, if it is still in the recent ring
    pub fn hash_at(&self, height: u64) -> Option<Hash> {
        let current = self.last_known_block_height;
        if height > current {
            return None;
        }
        let offset = usize::try_from(current - height).ok()?;
        self.last_known_block_hashes.get(offset).copied()
    }

    /// Roll the cursor back to `height` after a fork.
    ///
    /// Recent hashes and checkpoints above the new height belong to the
    /// abandoned chain and are dropped.
    pub fn rewind_to(&mut self, height: u64) {
        let current = self.last_known_block_height;
        if height >= current {
            return;
        }

        let discard = current - height;
        for _ in 0..discard {
            if self.last_known_block_hashes.pop_front().is_none() {
                break;
            }
        }

        // Checkpoints are recorded on consecutive multiples of the interval,
        // the newest being the last multiple at or below `current`
        let abandoned = (current / self.checkpoint_interval) - (height / self.checkpoint_interval);
        let abandoned = usize::try_from(abandoned).unwrap_or(usize::MAX);
        let keep = self.block_hash_checkpoints.len().saturating_sub(abandoned);
        self.block_hash_checkpoints.truncate(keep);

        warn!(from = current, to = height, "Rewound sync cursor after fork");
        self.last_known_block_height = height;
    }

    pub fn recent_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.last_known_block_hashes.iter()
    }

    pub fn checkpoints(&self) -> &[Hash] {
        &self.block_hash_checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hash_for(height: u64) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_le_bytes());
        Hash::from_bytes(bytes)
    }

    fn synced_to(height: u64) -> SyncStatus {
        let mut status = SyncStatus::new();
        for h in 1..=height {
            status.record_block(hash_for(h), h).unwrap();
        }
        status
    }

    #[test]
    fn test_checkpoint_emission() {
        let status = synced_to(5001);

        assert_eq!(status.height(), 5001);
        assert_eq!(status.checkpoints(), &[hash_for(5000)]);

        let recent: Vec<Hash> = status.recent_hashes().copied().collect();
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0], hash_for(5001));
        assert_eq!(recent[99], hash_for(4902));
    }

    #[test]
    fn test_gap_is_fatal() {
        let mut status = synced_to(10);
        let error = status.record_block(hash_for(12), 12).unwrap_err();
        assert!(matches!(
            error,
            SyncError::BlocksMissed {
                expected: 11,
                received: 12
            }
        ));
        assert_eq!(status.height(), 10);
    }

    #[test]
    fn test_first_block_may_start_anywhere() {
        let mut status = SyncStatus::new();
        status.record_block(hash_for(700_000), 700_000).unwrap();
        assert_eq!(status.height(), 700_000);
        status.record_block(hash_for(700_001), 700_001).unwrap();
    }

    #[test]
    fn test_query_order_newest_first() {
        let status = synced_to(10_050);
        let query = status.checkpoints_for_query();

        assert_eq!(query.len(), 102);
        assert_eq!(query[0], hash_for(10_050));
        assert_eq!(query[99], hash_for(9951));
        assert_eq!(query[100], hash_for(10_000));
        assert_eq!(query[101], hash_for(5000));
    }

    #[test]
    fn test_hash_at() {
        let status = synced_to(1000);
        assert_eq!(status.hash_at(1000), Some(hash_for(1000)));
        assert_eq!(status.hash_at(999), Some(hash_for(999)));
        assert_eq!(status.hash_at(901), Some(hash_for(901)));
        assert_eq!(status.hash_at(900), None);
        assert_eq!(status.hash_at(1001), None);
    }

    #[test]
    fn test_rewind_drops_abandoned_hashes() {
        let mut status = synced_to(10_002);
        status.rewind_to(9_998);

        assert_eq!(status.height(), 9_998);
        assert_eq!(status.recent_hashes().next(), Some(&hash_for(9_998)));
        assert_eq!(status.checkpoints(), &[hash_for(5000)]);

        // Forward sync continues from the rewound height
        status.record_block(hash_for(9_999), 9_999).unwrap();
        assert!(status.record_block(hash_for(10_001), 10_001).is_err());
    }

    #[test]
    fn test_rewind_keeps_genesis_and_older_checkpoints() {
        let mut status = SyncStatus::new();
        for h in 0..=10_002 {
            status.record_block(hash_for(h), h).unwrap();
        }
        assert_eq!(
            status.checkpoints(),
            &[hash_for(0), hash_for(5000), hash_for(10_000)]
        );

        status.rewind_to(9_998);
        assert_eq!(status.checkpoints(), &[hash_for(0), hash_for(5000)]);

        status.rewind_to(4_000);
        assert_eq!(status.checkpoints(), &[hash_for(0)]);
    }

    #[test]
    fn test_rewind_mid_chain_start_drops_abandoned_checkpoints() {
        let mut status = SyncStatus::new();
        for h in 7_000..=15_002 {
            status.record_block(hash_for(h), h).unwrap();
        }
        assert_eq!(status.checkpoints(), &[hash_for(10_000), hash_for(15_000)]);

        status.rewind_to(12_000);
        assert_eq!(status.checkpoints(), &[hash_for(10_000)]);

        // Forward sync on the new branch records a fresh 15000 checkpoint
        for h in 12_001..=15_000 {
            status.record_block(hash_for(h + 1_000_000), h).unwrap();
        }
        assert_eq!(
            status.checkpoints(),
            &[hash_for(10_000), hash_for(1_015_000)]
        );
    }

    #[test]
    fn test_rewind_is_noop_when_ahead() {
        let mut status = synced_to(50);
        status.rewind_to(60);
        assert_eq!(status.height(), 50);
    }

    #[test]
    fn test_serialization_round_trip() {
        let status = synced_to(5010);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["lastKnownBlockHeight"], 5010);
        assert_eq!(json["lastKnownBlockHashes"].as_array().unwrap().len(), 100);
        assert_eq!(json["blockHashCheckpoints"][0], hash_for(5000).to_hex());

        let back: SyncStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
        assert_eq!(back.checkpoints_for_query(), status.checkpoints_for_query());
    }

    proptest! {
        #[test]
        fn prop_height_increases_by_one(start in 1u64..1_000_000, count in 1usize..300) {
            let mut status = SyncStatus::new();
            let mut previous = status.height();
            for h in start..start + count as u64 {
                status.record_block(hash_for(h), h).unwrap();
                prop_assert!(status.height() >= previous);
                if previous != 0 {
                    prop_assert_eq!(status.height(), previous + 1);
                }
                previous = status.height();
            }
            prop_assert!(status.recent_hashes().count() <= 100);
        }

        #[test]
        fn prop_non_contiguous_rejected(height in 2u64..10_000, jump in 2u64..50) {
            let mut status = SyncStatus::new();
            status.record_block(hash_for(height), height).unwrap();
            prop_assert!(status.record_block(hash_for(height + jump), height + jump).is_err());
            prop_assert_eq!(status.height(), height);
        }
    }
}
