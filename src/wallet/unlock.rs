//! Unlock-time rules
//!
//! An unlock time of zero is always unlocked. Values at or above
//! `max_block_number` are unix timestamps; smaller values are block heights.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::NetworkParameters;

/// Seconds since the unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whether an output with `unlock_time` is spendable at `current_height`,
/// with `now` as the wall-clock time
pub fn is_unlocked_at(
    unlock_time: u64,
    current_height: u64,
    now: u64,
    network: &NetworkParameters,
) -> bool {
    if unlock_time == 0 {
        return true;
    }

    if unlock_time >= network.max_block_number {
        now + network.locked_tx_allowed_delta_seconds >= unlock_time
    } else {
        current_height + network.locked_tx_allowed_delta_blocks >= unlock_time
    }
}

pub fn is_unlocked(unlock_time: u64, current_height: u64, network: &NetworkParameters) -> bool {
    is_unlocked_at(unlock_time, current_height, unix_now(), network)
}
