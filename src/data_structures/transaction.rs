//! Wallet-side records of owned outputs and of transactions affecting the wallet

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{Hash, KeyImage, PublicKey};

/// Where an owned output currently sits. Every output is in exactly one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputStatus {
    Unspent = 0,
    Spent = 1,
    /// Consumed by a transaction we sent that has not been seen in a block yet
    Locked = 2,
}

impl From<u32> for InputStatus {
    fn from(value: u32) -> Self {
        match value {
            1 => InputStatus::Spent,
            2 => InputStatus::Locked,
            _ => InputStatus::Unspent,
        }
    }
}

impl From<InputStatus> for u32 {
    fn from(status: InputStatus) -> Self {
        status as u32
    }
}

/// An output we own, usable as an input to a future transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// Absent for view wallets, which cannot derive key images
    pub key_image: Option<KeyImage>,
    pub amount: u64,
    /// Height of the block the output appeared in
    pub block_height: u64,
    pub transaction_public_key: PublicKey,
    /// Index of the output within its transaction
    pub transaction_index: u64,
    /// Needed to spend the output; filled lazily when sending
    pub global_output_index: Option<u64>,
    /// One-time output key, unique per output
    pub key: PublicKey,
    /// Height of the block the output was spent in
    pub spend_height: Option<u64>,
    pub unlock_time: u64,
    /// Transaction that created the output
    pub parent_transaction_hash: Hash,
    /// Our unconfirmed transaction consuming the output, while locked
    #[serde(default)]
    pub spending_transaction_hash: Option<Hash>,
}

impl TransactionInput {
    /// Whether this is the same output as `other`, by key image when both
    /// have one, otherwise by one-time key
    pub fn same_output(&self, other: &TransactionInput) -> bool {
        match (&self.key_image, &other.key_image) {
            (Some(a), Some(b)) => a == b,
            _ => self.key == other.key,
        }
    }
}

/// A transaction as it affected the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Net effect per owned spend key. Negative when funds left that subwallet.
    pub transfers: BTreeMap<PublicKey, i64>,
    pub hash: Hash,
    pub fee: u64,
    /// Zero while unconfirmed
    pub block_height: u64,
    pub timestamp: u64,
    #[serde(rename = "paymentID")]
    pub payment_id: String,
    pub unlock_time: u64,
    pub is_coinbase: bool,
}

impl Transaction {
    /// Net effect of the transaction across every owned address
    pub fn total_amount(&self) -> i64 {
        self.transfers
            .values()
            .fold(0i64, |total, amount| total.saturating_add(*amount))
    }

    /// Fusion transactions consolidate inputs: no fee and not coinbase
    pub fn is_fusion(&self) -> bool {
        self.fee == 0 && !self.is_coinbase
    }

    pub fn is_confirmed(&self) -> bool {
        self.block_height != 0
    }
}
