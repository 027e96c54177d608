//! Raw block data as returned by the daemon's wallet sync endpoint
//!
//! A [`WalletBlock`] carries everything needed to test ownership of its
//! outputs and detect spends of our inputs without fetching anything else.

use serde::{Deserialize, Serialize};

use super::types::{Hash, KeyImage, PublicKey};

/// An output paying to a one-time key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutput {
    pub key: PublicKey,
    pub amount: u64,
    /// Filled in when the daemon includes global indexes in sync data
    #[serde(default, rename = "globalIndex", skip_serializing_if = "Option::is_none")]
    pub global_output_index: Option<u64>,
}

/// A ring-signature input referencing earlier outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    pub amount: u64,
    #[serde(default)]
    pub key_offsets: Vec<u64>,
    #[serde(rename = "k_image")]
    pub key_image: KeyImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCoinbaseTransaction {
    #[serde(rename = "outputs")]
    pub key_outputs: Vec<KeyOutput>,
    pub hash: Hash,
    #[serde(rename = "txPublicKey")]
    pub transaction_public_key: PublicKey,
    pub unlock_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(rename = "outputs")]
    pub key_outputs: Vec<KeyOutput>,
    pub hash: Hash,
    #[serde(rename = "txPublicKey")]
    pub transaction_public_key: PublicKey,
    pub unlock_time: u64,
    #[serde(rename = "paymentID", default)]
    pub payment_id: String,
    #[serde(rename = "inputs", default)]
    pub key_inputs: Vec<KeyInput>,
}

/// Transaction data the scanner needs, shared by coinbase and normal transactions
pub trait ScannableTransaction {
    fn hash(&self) -> Hash;
    fn transaction_public_key(&self) -> &PublicKey;
    fn key_outputs(&self) -> &[KeyOutput];
    fn unlock_time(&self) -> u64;
}

impl ScannableTransaction for RawCoinbaseTransaction {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn transaction_public_key(&self) -> &PublicKey {
        &self.transaction_public_key
    }

    fn key_outputs(&self) -> &[KeyOutput] {
        &self.key_outputs
    }

    fn unlock_time(&self) -> u64 {
        self.unlock_time
    }
}

impl ScannableTransaction for RawTransaction {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn transaction_public_key(&self) -> &PublicKey {
        &self.transaction_public_key
    }

    fn key_outputs(&self) -> &[KeyOutput] {
        &self.key_outputs
    }

    fn unlock_time(&self) -> u64 {
        self.unlock_time
    }
}

/// One block of wallet sync data, the unit moved through the block queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBlock {
    #[serde(rename = "coinbaseTX")]
    pub coinbase_transaction: RawCoinbaseTransaction,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    pub block_height: u64,
    pub block_hash: Hash,
    pub block_timestamp: u64,
    /// Parent hash, when the daemon reports it. Lets the downloader spot a
    /// fork at the tip even when heights line up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<Hash>,
}

impl WalletBlock {
    /// Total number of outputs in the block, coinbase included
    pub fn output_count(&self) -> usize {
        self.coinbase_transaction.key_outputs.len()
            + self
                .transactions
                .iter()
                .map(|tx| tx.key_outputs.len())
                .sum::<usize>()
    }
}
