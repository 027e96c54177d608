//! Transfer validation and preparation
//!
//! A send runs in three steps: [`validate_transfer`] checks every parameter
//! before any work is done, [`prepare_transfer`] selects inputs, works out
//! change and fills in missing global output indexes, and an external
//! [`TransactionSigner`] turns the result into a raw transaction. Relaying and
//! recording the sent transaction happen in
//! [`WalletBackend::send_transaction`](super::WalletBackend::send_transaction).

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use super::node_fee::append_fee_destination;
use super::sub_wallet::UnconfirmedInput;
use super::sub_wallets::{SpendableInput, SubWallets};
use crate::config::NetworkParameters;
use crate::data_structures::address::validate_payment_id;
use crate::data_structures::{Address, Hash, PublicKey, SecretKey, Transaction};
use crate::errors::{DaemonError, WalletError, WalletResult};
use crate::scanning::{DaemonProxy, NodeFee};

/// A user's send request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// `(address, amount)` pairs; integrated addresses are allowed
    pub destinations: Vec<(String, u64)>,
    pub mixin: u64,
    pub fee: u64,
    pub payment_id: String,
    /// Addresses to spend from; empty means every address
    pub source_addresses: Vec<String>,
    /// Defaults to the primary address
    pub change_address: Option<String>,
    pub unlock_time: u64,
}

impl TransferRequest {
    /// Single destination with the default mixin and the minimum fee
    pub fn basic(destination: &str, amount: u64, network: &NetworkParameters) -> Self {
        Self {
            destinations: vec![(destination.to_string(), amount)],
            mixin: network.default_mixin,
            fee: network.minimum_fee,
            payment_id: String::new(),
            source_addresses: Vec::new(),
            change_address: None,
            unlock_time: 0,
        }
    }

    pub fn with_payment_id(mut self, payment_id: &str) -> Self {
        self.payment_id = payment_id.to_string();
        self
    }

    pub fn with_mixin(mut self, mixin: u64) -> Self {
        self.mixin = mixin;
        self
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn from_addresses(mut self, addresses: Vec<String>) -> Self {
        self.source_addresses = addresses;
        self
    }
}

/// One output of the transaction being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDestination {
    pub amount: u64,
    pub public_spend_key: PublicKey,
    pub public_view_key: PublicKey,
}

/// Everything a signer needs to build the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransfer {
    pub inputs: Vec<SpendableInput>,
    pub sum_of_inputs: u64,
    /// Recipients, node fee and change, split into denominations
    pub destinations: Vec<TransactionDestination>,
    pub change_amount: u64,
    pub change_address: String,
    pub change_spend_key: PublicKey,
    pub fee: u64,
    pub mixin: u64,
    pub payment_id: String,
    pub unlock_time: u64,
}

/// A signed transaction ready to relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: Hash,
    /// Hex encoded transaction blob
    pub raw_transaction: String,
    pub transaction_private_key: Option<SecretKey>,
    /// One-time keys and amounts of the outputs paying change back to us
    pub change_outputs: Vec<(PublicKey, u64)>,
}

/// Builds and signs transactions: ring member selection, ring signatures and
/// serialization live behind this trait.
pub trait TransactionSigner: Send + Sync {
    fn sign(
        &self,
        prepared: &PreparedTransfer,
        daemon: &dyn DaemonProxy,
    ) -> WalletResult<SignedTransaction>;
}

/// Split an amount into one output per non-zero decimal digit,
/// e.g. 1234 into 4, 30, 200 and 1000
pub fn split_amount_into_denominations(mut amount: u64) -> Vec<u64> {
    let mut amounts = Vec::new();
    let mut multiplier = 1u64;

    while amount > 0 {
        let denomination = multiplier * (amount % 10);
        if denomination != 0 {
            amounts.push(denomination);
        }
        amount /= 10;
        multiplier = multiplier.saturating_mul(10);
    }

    amounts
}

/// Block range to request global indexes for, wide enough to hide which
/// block we care about
pub fn obscured_range(block_height: u64, obscurity: u64) -> (u64, u64) {
    let obscurity = obscurity.max(1);
    let lower = block_height - block_height % obscurity;
    (lower, lower + obscurity)
}

/// Check every address is well formed, returning them decoded
pub fn validate_addresses(
    addresses: &[String],
    integrated_allowed: bool,
    address_prefix: u64,
) -> WalletResult<Vec<Address>> {
    addresses
        .iter()
        .map(|address| {
            let decoded = Address::decode(address, address_prefix)?;
            if decoded.is_integrated() && !integrated_allowed {
                return Err(WalletError::IntegratedAddressNotAllowed);
            }
            Ok(decoded)
        })
        .collect()
}

pub fn validate_destinations(
    destinations: &[(String, u64)],
    address_prefix: u64,
) -> WalletResult<()> {
    if destinations.is_empty() {
        return Err(WalletError::NoDestinationsGiven);
    }
    if destinations.iter().any(|(_, amount)| *amount == 0) {
        return Err(WalletError::AmountIsZero);
    }
    let addresses: Vec<String> = destinations.iter().map(|(a, _)| a.clone()).collect();
    validate_addresses(&addresses, true, address_prefix)?;
    Ok(())
}

/// Payment id to use once integrated addresses are unpacked.
///
/// Every integrated address must carry the same id, which must also match
/// `payment_id` when one is given.
pub fn validate_integrated_addresses(
    destinations: &[(String, u64)],
    payment_id: &str,
    address_prefix: u64,
) -> WalletResult<String> {
    let mut resolved = payment_id.to_lowercase();

    for (address, _) in destinations {
        let decoded = Address::decode(address, address_prefix)?;
        let Some(extracted) = decoded.payment_id else {
            continue;
        };
        if resolved.is_empty() {
            resolved = extracted;
        } else if resolved != extracted {
            return Err(WalletError::ConflictingPaymentIds);
        }
    }

    Ok(resolved)
}

/// Addresses must be standard addresses belonging to this wallet
pub fn validate_our_addresses(
    addresses: &[String],
    sub_wallets: &SubWallets,
) -> WalletResult<Vec<PublicKey>> {
    validate_addresses(addresses, false, sub_wallets.network().address_prefix)?;
    addresses
        .iter()
        .map(|address| sub_wallets.public_spend_key_for(address))
        .collect()
}

pub fn validate_mixin(mixin: u64, network: &NetworkParameters) -> WalletResult<()> {
    if mixin < network.minimum_mixin {
        return Err(WalletError::MixinTooSmall {
            mixin,
            min: network.minimum_mixin,
        });
    }
    if mixin > network.maximum_mixin {
        return Err(WalletError::MixinTooBig {
            mixin,
            max: network.maximum_mixin,
        });
    }
    Ok(())
}

/// Sum of destination amounts plus fee
pub fn transaction_total(destinations: &[(String, u64)], fee: u64) -> WalletResult<u64> {
    destinations
        .iter()
        .try_fold(fee, |total, (_, amount)| total.checked_add(*amount))
        .ok_or(WalletError::WillOverflow)
}

/// Check the fee and that the source addresses can cover the transfer
pub fn validate_amount(
    destinations: &[(String, u64)],
    fee: u64,
    source_keys: &[PublicKey],
    sub_wallets: &SubWallets,
    current_height: u64,
) -> WalletResult<()> {
    let network = sub_wallets.network();
    if fee < network.minimum_fee {
        return Err(WalletError::FeeTooSmall {
            fee,
            min: network.minimum_fee,
        });
    }

    let (unlocked, locked) =
        sub_wallets.get_balance(source_keys, source_keys.is_empty(), current_height)?;
    let required = transaction_total(destinations, fee)?;

    if required > unlocked {
        let total = unlocked + locked;
        return Err(if required <= total {
            WalletError::NotEnoughUnlockedBalance {
                required,
                unlocked,
                total,
            }
        } else {
            WalletError::NotEnoughBalance {
                required,
                available: total,
            }
        });
    }

    Ok(())
}

/// Validate a request whose destinations already include any node fee
pub fn validate_transfer(
    request: &TransferRequest,
    change_address: &str,
    sub_wallets: &SubWallets,
    current_height: u64,
) -> WalletResult<()> {
    if sub_wallets.is_view_wallet() {
        return Err(WalletError::IllegalViewWalletOperation);
    }

    let network = sub_wallets.network();
    validate_destinations(&request.destinations, network.address_prefix)?;
    validate_integrated_addresses(
        &request.destinations,
        &request.payment_id,
        network.address_prefix,
    )?;
    let source_keys = validate_our_addresses(&request.source_addresses, sub_wallets)?;
    validate_amount(
        &request.destinations,
        request.fee,
        &source_keys,
        sub_wallets,
        current_height,
    )?;
    validate_mixin(request.mixin, network)?;
    validate_payment_id(&request.payment_id)?;
    validate_our_addresses(&[change_address.to_string()], sub_wallets)?;
    Ok(())
}

/// Turn `(address, amount)` pairs plus change into denominated outputs
fn setup_destinations(
    destinations: &[(Address, u64)],
    change: Option<(&Address, u64)>,
) -> Vec<TransactionDestination> {
    destinations
        .iter()
        .map(|(address, amount)| (address, *amount))
        .chain(change)
        .flat_map(|(address, amount)| {
            split_amount_into_denominations(amount)
                .into_iter()
                .map(move |denomination| TransactionDestination {
                    amount: denomination,
                    public_spend_key: address.public_spend_key,
                    public_view_key: address.public_view_key,
                })
        })
        .collect()
}

/// Fetch global output indexes for inputs that do not have one yet
fn fill_global_indexes(
    inputs: &mut [SpendableInput],
    daemon: &dyn DaemonProxy,
    obscurity: u64,
) -> WalletResult<HashMap<PublicKey, u64>> {
    let mut by_range: BTreeMap<(u64, u64), Vec<usize>> = BTreeMap::new();
    for (position, spendable) in inputs.iter().enumerate() {
        if spendable.input.global_output_index.is_none() {
            by_range
                .entry(obscured_range(spendable.input.block_height, obscurity))
                .or_default()
                .push(position);
        }
    }

    let mut filled = HashMap::new();
    for ((start_height, end_height), positions) in by_range {
        let indexes = daemon.get_global_indexes_for_range(start_height, end_height)?;
        for position in positions {
            let input = &mut inputs[position].input;
            let index = indexes
                .get(&input.parent_transaction_hash)
                .and_then(|tx_indexes| tx_indexes.get(input.transaction_index as usize))
                .copied()
                .ok_or_else(|| {
                    DaemonError::malformed(&format!(
                        "No global index for output {} of transaction {}",
                        input.transaction_index, input.parent_transaction_hash
                    ))
                })?;
            input.global_output_index = Some(index);
            filled.insert(input.key, index);
        }
    }

    Ok(filled)
}

/// Validate the request and select what the transaction will spend
pub fn prepare_transfer(
    request: &TransferRequest,
    node_fee: &NodeFee,
    sub_wallets: &SubWallets,
    daemon: &dyn DaemonProxy,
    current_height: u64,
    global_indexes_obscurity: u64,
) -> WalletResult<PreparedTransfer> {
    let network = sub_wallets.network().clone();

    let mut request = request.clone();
    request.destinations =
        append_fee_destination(request.destinations, node_fee, network.address_prefix);
    let change_address = request
        .change_address
        .clone()
        .unwrap_or_else(|| sub_wallets.primary_address());

    validate_transfer(&request, &change_address, sub_wallets, current_height)?;

    let payment_id = validate_integrated_addresses(
        &request.destinations,
        &request.payment_id,
        network.address_prefix,
    )?;
    let destinations: Vec<(Address, u64)> = request
        .destinations
        .iter()
        .map(|(address, amount)| {
            Address::decode(address, network.address_prefix).map(|a| (a.standard(), *amount))
        })
        .collect::<WalletResult<_>>()?;

    let total = transaction_total(&request.destinations, request.fee)?;
    let source_keys = validate_our_addresses(&request.source_addresses, sub_wallets)?;
    let (mut inputs, sum_of_inputs) = sub_wallets.get_transaction_inputs_for_amount(
        total,
        source_keys.is_empty(),
        &source_keys,
        current_height,
    )?;

    let change_amount = sum_of_inputs - total;
    let change = Address::decode(&change_address, network.address_prefix)?;
    let outputs = setup_destinations(
        &destinations,
        (change_amount != 0).then_some((&change, change_amount)),
    );

    let filled = fill_global_indexes(&mut inputs, daemon, global_indexes_obscurity)?;
    if !filled.is_empty() {
        sub_wallets.set_global_output_indexes(&filled);
    }

    debug!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        total,
        change_amount,
        "Prepared transfer"
    );

    Ok(PreparedTransfer {
        inputs,
        sum_of_inputs,
        destinations: outputs,
        change_amount,
        change_address,
        change_spend_key: change.public_spend_key,
        fee: request.fee,
        mixin: request.mixin,
        payment_id,
        unlock_time: request.unlock_time,
    })
}

/// The unconfirmed record of a transaction we just relayed
pub fn sent_transaction_record(prepared: &PreparedTransfer, hash: Hash) -> Transaction {
    let mut transfers: BTreeMap<PublicKey, i64> = BTreeMap::new();
    for spent in &prepared.inputs {
        *transfers.entry(spent.public_spend_key).or_default() -=
            i64::try_from(spent.input.amount).unwrap_or(i64::MAX);
    }
    if prepared.change_amount != 0 {
        *transfers.entry(prepared.change_spend_key).or_default() +=
            i64::try_from(prepared.change_amount).unwrap_or(i64::MAX);
    }

    Transaction {
        transfers,
        hash,
        fee: prepared.fee,
        block_height: 0,
        timestamp: 0,
        payment_id: prepared.payment_id.clone(),
        unlock_time: 0,
        is_coinbase: false,
    }
}

/// Hand a signed transaction to the daemon
pub fn relay_transaction(daemon: &dyn DaemonProxy, signed: &SignedTransaction) -> WalletResult<()> {
    match daemon.send_transaction(&signed.raw_transaction) {
        Ok(true) => {
            info!(hash = %signed.hash, "Relayed transaction");
            Ok(())
        }
        Ok(false) => Err(WalletError::TransactionRejected(signed.hash.to_hex())),
        Err(DaemonError::ConnectionFailed(_) | DaemonError::Timeout) => {
            Err(WalletError::DaemonOffline)
        }
        Err(e) => Err(e.into()),
    }
}

/// Lock the spent inputs and keep the transaction as unconfirmed until a
/// block includes it
pub fn store_sent_transaction(
    sub_wallets: &SubWallets,
    prepared: &PreparedTransfer,
    signed: &SignedTransaction,
) -> WalletResult<Transaction> {
    for spent in &prepared.inputs {
        if let Some(key_image) = &spent.input.key_image {
            sub_wallets.mark_input_as_locked(key_image, &spent.public_spend_key, signed.hash)?;
        }
    }

    for (key, amount) in &signed.change_outputs {
        sub_wallets.store_unconfirmed_incoming_input(
            &prepared.change_spend_key,
            UnconfirmedInput {
                amount: *amount,
                key: *key,
                parent_transaction_hash: signed.hash,
            },
        );
    }

    if let Some(private_key) = &signed.transaction_private_key {
        sub_wallets.store_tx_private_key(signed.hash, private_key.clone());
    }

    let record = sent_transaction_record(prepared, signed.hash);
    sub_wallets.add_unconfirmed_transaction(record.clone())?;
    Ok(record)
}
