//! Finding our outputs and possible spends in a block
//!
//! Scanning only needs the private view key and the set of public spend keys,
//! so it runs outside the wallet lock. The result is a list of
//! [`ScannedTransaction`]s which the wallet applies in one step.
//!
//! With the `parallel` feature, the transactions of a block are scanned on the
//! rayon thread pool.

use std::collections::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{trace, warn};

use crate::crypto::{generate_key_derivation, underive_public_key};
use crate::data_structures::{
    KeyDerivation, PublicKey, RawTransaction, ScannableTransaction, SecretKey, TransactionInput,
    WalletBlock,
};
use crate::wallet::{OwnedOutput, ScannedTransaction};

/// Keys needed to recognise our outputs
#[derive(Debug, Clone)]
pub struct ScanKeys {
    pub private_view_key: SecretKey,
    pub public_spend_keys: HashSet<PublicKey>,
}

impl ScanKeys {
    pub fn new(private_view_key: SecretKey, public_spend_keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            private_view_key,
            public_spend_keys: public_spend_keys.into_iter().collect(),
        }
    }
}

/// Outputs of `transaction` addressed to one of our spend keys
fn find_owned_outputs<T: ScannableTransaction>(
    transaction: &T,
    keys: &ScanKeys,
    block: &WalletBlock,
) -> Vec<OwnedOutput> {
    let derivation: KeyDerivation =
        match generate_key_derivation(transaction.transaction_public_key(), &keys.private_view_key) {
            Ok(derivation) => derivation,
            Err(e) => {
                trace!(hash = %transaction.hash(), error = %e, "Skipping transaction with bad public key");
                return Vec::new();
            }
        };

    transaction
        .key_outputs()
        .iter()
        .enumerate()
        .filter_map(|(index, output)| {
            let output_index = index as u64;
            let spend_key = underive_public_key(&derivation, output_index, &output.key).ok()?;
            if !keys.public_spend_keys.contains(&spend_key) {
                return None;
            }

            Some(OwnedOutput {
                public_spend_key: spend_key,
                derivation,
                output_index,
                input: TransactionInput {
                    key_image: None,
                    amount: output.amount,
                    block_height: block.block_height,
                    transaction_public_key: *transaction.transaction_public_key(),
                    transaction_index: output_index,
                    global_output_index: output.global_output_index,
                    key: output.key,
                    spend_height: None,
                    unlock_time: transaction.unlock_time(),
                    parent_transaction_hash: transaction.hash(),
                    spending_transaction_hash: None,
                },
            })
        })
        .collect()
}

/// Sum of `amounts`, or `None` if it does not fit in a `u64`
fn checked_total(mut amounts: impl Iterator<Item = u64>) -> Option<u64> {
    amounts.try_fold(0u64, u64::checked_add)
}

fn scan_transaction(
    transaction: &RawTransaction,
    keys: &ScanKeys,
    block: &WalletBlock,
) -> Option<ScannedTransaction> {
    let owned_outputs = find_owned_outputs(transaction, keys, block);
    if owned_outputs.is_empty() && transaction.key_inputs.is_empty() {
        return None;
    }

    let sum_of_inputs = checked_total(transaction.key_inputs.iter().map(|i| i.amount));
    let sum_of_outputs = checked_total(transaction.key_outputs.iter().map(|o| o.amount));
    let (Some(sum_of_inputs), Some(sum_of_outputs)) = (sum_of_inputs, sum_of_outputs) else {
        warn!(
            hash = %transaction.hash,
            height = block.block_height,
            "Skipping transaction whose amounts overflow"
        );
        return None;
    };

    Some(ScannedTransaction {
        hash: transaction.hash,
        owned_outputs,
        spent_key_images: transaction
            .key_inputs
            .iter()
            .map(|input| (input.key_image, input.amount))
            .collect(),
        fee: sum_of_inputs.saturating_sub(sum_of_outputs),
        block_height: block.block_height,
        timestamp: block.block_timestamp,
        payment_id: transaction.payment_id.clone(),
        unlock_time: transaction.unlock_time,
        is_coinbase: false,
    })
}

fn scan_coinbase(block: &WalletBlock, keys: &ScanKeys) -> Option<ScannedTransaction> {
    let coinbase = &block.coinbase_transaction;
    let owned_outputs = find_owned_outputs(coinbase, keys, block);
    if owned_outputs.is_empty() {
        return None;
    }
    if checked_total(coinbase.key_outputs.iter().map(|o| o.amount)).is_none() {
        warn!(
            hash = %coinbase.hash,
            height = block.block_height,
            "Skipping coinbase whose amounts overflow"
        );
        return None;
    }

    Some(ScannedTransaction {
        hash: coinbase.hash,
        owned_outputs,
        spent_key_images: Vec::new(),
        fee: 0,
        block_height: block.block_height,
        timestamp: block.block_timestamp,
        payment_id: String::new(),
        unlock_time: coinbase.unlock_time,
        is_coinbase: true,
    })
}

/// Everything in `block` that may concern the wallet, in block order
pub fn scan_block(
    block: &WalletBlock,
    keys: &ScanKeys,
    process_coinbase: bool,
) -> Vec<ScannedTransaction> {
    let mut scanned = Vec::new();

    if process_coinbase {
        scanned.extend(scan_coinbase(block, keys));
    }

    #[cfg(feature = "parallel")]
    let transactions: Vec<Option<ScannedTransaction>> = block
        .transactions
        .par_iter()
        .map(|tx| scan_transaction(tx, keys, block))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let transactions: Vec<Option<ScannedTransaction>> = block
        .transactions
        .iter()
        .map(|tx| scan_transaction(tx, keys, block))
        .collect();

    scanned.extend(transactions.into_iter().flatten());
    scanned
}
