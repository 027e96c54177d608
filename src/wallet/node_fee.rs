//! Optional fee a daemon operator asks for, paid as an extra destination
//!
//! The fee is only honoured when it is non-zero and addressed to a valid,
//! non-integrated address; a daemon cannot force anything else onto a
//! transaction.

use tracing::debug;

use crate::data_structures::Address;
use crate::scanning::NodeFee;

pub fn is_valid_fee(fee: &NodeFee, address_prefix: u64) -> bool {
    if fee.amount == 0 || fee.address.is_empty() {
        return false;
    }

    match Address::decode(&fee.address, address_prefix) {
        Ok(address) => !address.is_integrated(),
        Err(_) => false,
    }
}

/// The fee if it is valid
pub fn node_fee(fee: &NodeFee, address_prefix: u64) -> Option<NodeFee> {
    is_valid_fee(fee, address_prefix).then(|| fee.clone())
}

/// Append the node fee to `destinations` when it is valid
pub fn append_fee_destination(
    mut destinations: Vec<(String, u64)>,
    fee: &NodeFee,
    address_prefix: u64,
) -> Vec<(String, u64)> {
    if is_valid_fee(fee, address_prefix) {
        destinations.push((fee.address.clone(), fee.amount));
    } else if fee.amount != 0 {
        debug!(address = %fee.address, "Ignoring invalid node fee");
    }
    destinations
}
