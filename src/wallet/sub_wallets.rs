//! The wallet state shared between the process stage and the caller
//!
//! [`SubWallets`] owns every [`SubWallet`] plus the transaction history behind
//! a single mutex. Every operation takes the lock once, so a balance read
//! never observes a partially applied block. Only the process stage and the
//! caller change it; the download stage reads the hashes of our pending sends
//! and hands everything else it learns to the process stage.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sub_wallet::{SubWallet, UnconfirmedInput};
use super::unlock::unix_now;
use crate::config::NetworkParameters;
use crate::crypto::{generate_keys, secret_key_to_public_key};
use crate::data_structures::{
    Address, Hash, KeyDerivation, KeyImage, PublicKey, SecretKey, Transaction, TransactionInput,
};
use crate::errors::{WalletError, WalletResult};

/// Serialized form of the wallet state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWalletsState {
    /// Creation order; the first key is the primary address
    pub public_spend_keys: Vec<PublicKey>,
    pub sub_wallets: BTreeMap<PublicKey, SubWallet>,
    pub transactions: Vec<Transaction>,
    /// Sent by us, not yet seen in a block
    pub locked_transactions: Vec<Transaction>,
    pub private_view_key: SecretKey,
    pub is_view_wallet: bool,
    #[serde(default)]
    pub tx_private_keys: BTreeMap<Hash, SecretKey>,
}

/// An unlocked input selected for a transfer, with the keys needed to sign it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableInput {
    pub input: TransactionInput,
    pub public_spend_key: PublicKey,
    pub private_spend_key: SecretKey,
}

/// An output found to belong to one of our spend keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedOutput {
    pub public_spend_key: PublicKey,
    pub derivation: KeyDerivation,
    pub output_index: u64,
    pub input: TransactionInput,
}

/// What scanning found in one transaction, ready to apply to the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTransaction {
    pub hash: Hash,
    pub owned_outputs: Vec<OwnedOutput>,
    /// Key images and amounts of every key input of the transaction
    pub spent_key_images: Vec<(KeyImage, u64)>,
    pub fee: u64,
    pub block_height: u64,
    pub timestamp: u64,
    pub payment_id: String,
    pub unlock_time: u64,
    pub is_coinbase: bool,
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// Drop the transfers of `spend_key` from `transactions`, removing
/// transactions that only affected that key
fn delete_address_transactions(transactions: &mut Vec<Transaction>, spend_key: &PublicKey) {
    transactions.retain_mut(|tx| {
        if tx.transfers.remove(spend_key).is_some() {
            !tx.transfers.is_empty()
        } else {
            true
        }
    });
}

pub struct SubWallets {
    state: Mutex<SubWalletsState>,
    network: NetworkParameters,
}

impl std::fmt::Debug for SubWallets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubWallets")
            .field("wallets", &state.public_spend_keys.len())
            .field("transactions", &state.transactions.len())
            .field("is_view_wallet", &state.is_view_wallet)
            .finish()
    }
}

impl SubWallets {
    /// Wallet with a single primary spend key.
    ///
    /// A new wallet starts syncing from the current time; a restored one
    /// from `scan_height`.
    pub fn new(
        private_spend_key: SecretKey,
        private_view_key: SecretKey,
        scan_height: u64,
        new_wallet: bool,
        network: NetworkParameters,
    ) -> WalletResult<Self> {
        let public_spend_key = secret_key_to_public_key(&private_spend_key)?;
        let public_view_key = secret_key_to_public_key(&private_view_key)?;
        let address = Address::new(public_spend_key, public_view_key).encode(network.address_prefix);
        let timestamp = if new_wallet {
            network.current_timestamp_adjusted()
        } else {
            0
        };

        let primary = SubWallet::new(
            public_spend_key,
            Some(private_spend_key),
            address,
            scan_height,
            timestamp,
            true,
        );

        Ok(Self::from_state(
            SubWalletsState {
                public_spend_keys: vec![public_spend_key],
                sub_wallets: BTreeMap::from([(public_spend_key, primary)]),
                transactions: Vec::new(),
                locked_transactions: Vec::new(),
                private_view_key,
                is_view_wallet: false,
                tx_private_keys: BTreeMap::new(),
            },
            network,
        ))
    }

    /// View-only wallet for `address`, which must match `private_view_key`
    pub fn new_view_wallet(
        private_view_key: SecretKey,
        address: &str,
        scan_height: u64,
        new_wallet: bool,
        network: NetworkParameters,
    ) -> WalletResult<Self> {
        let decoded = Address::decode(address, network.address_prefix)?;
        if decoded.is_integrated() {
            return Err(WalletError::IntegratedAddressNotAllowed);
        }
        if secret_key_to_public_key(&private_view_key)? != decoded.public_view_key {
            return Err(WalletError::AddressNotValid);
        }

        let timestamp = if new_wallet {
            network.current_timestamp_adjusted()
        } else {
            0
        };
        let public_spend_key = decoded.public_spend_key;
        let primary = SubWallet::new(
            public_spend_key,
            None,
            address.to_string(),
            scan_height,
            timestamp,
            true,
        );

        Ok(Self::from_state(
            SubWalletsState {
                public_spend_keys: vec![public_spend_key],
                sub_wallets: BTreeMap::from([(public_spend_key, primary)]),
                transactions: Vec::new(),
                locked_transactions: Vec::new(),
                private_view_key,
                is_view_wallet: true,
                tx_private_keys: BTreeMap::new(),
            },
            network,
        ))
    }

    pub fn from_state(state: SubWalletsState, network: NetworkParameters) -> Self {
        Self {
            state: Mutex::new(state),
            network,
        }
    }

    /// Consistent copy of the whole state, for persistence
    pub fn snapshot(&self) -> SubWalletsState {
        self.state.lock().clone()
    }

    pub fn network(&self) -> &NetworkParameters {
        &self.network
    }

    /// Generate a fresh spend key and add it as a new address
    pub fn add_sub_wallet(&self) -> WalletResult<(String, SecretKey)> {
        let mut state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }

        let (public_spend_key, private_spend_key) = generate_keys();
        let public_view_key = secret_key_to_public_key(&state.private_view_key)?;
        let address =
            Address::new(public_spend_key, public_view_key).encode(self.network.address_prefix);

        state.sub_wallets.insert(
            public_spend_key,
            SubWallet::new(
                public_spend_key,
                Some(private_spend_key.clone()),
                address.clone(),
                0,
                self.network.current_timestamp_adjusted(),
                false,
            ),
        );
        state.public_spend_keys.push(public_spend_key);
        info!(address = %address, "Added subwallet");

        Ok((address, private_spend_key))
    }

    /// Import an existing spend key, scanning from `scan_height`
    pub fn import_sub_wallet(
        &self,
        private_spend_key: SecretKey,
        scan_height: u64,
    ) -> WalletResult<String> {
        let mut state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }

        let public_spend_key = secret_key_to_public_key(&private_spend_key)?;
        if state.sub_wallets.contains_key(&public_spend_key) {
            return Err(WalletError::SubWalletAlreadyExists);
        }

        let public_view_key = secret_key_to_public_key(&state.private_view_key)?;
        let address =
            Address::new(public_spend_key, public_view_key).encode(self.network.address_prefix);

        state.sub_wallets.insert(
            public_spend_key,
            SubWallet::new(
                public_spend_key,
                Some(private_spend_key),
                address.clone(),
                scan_height,
                0,
                false,
            ),
        );
        state.public_spend_keys.push(public_spend_key);
        info!(address = %address, scan_height, "Imported subwallet");

        Ok(address)
    }

    /// Import a public spend key into a view wallet
    pub fn import_view_sub_wallet(
        &self,
        public_spend_key: PublicKey,
        scan_height: u64,
    ) -> WalletResult<String> {
        let mut state = self.state.lock();
        if !state.is_view_wallet {
            return Err(WalletError::IllegalNonViewWalletOperation);
        }
        if state.sub_wallets.contains_key(&public_spend_key) {
            return Err(WalletError::SubWalletAlreadyExists);
        }

        let public_view_key = secret_key_to_public_key(&state.private_view_key)?;
        let address =
            Address::new(public_spend_key, public_view_key).encode(self.network.address_prefix);

        state.sub_wallets.insert(
            public_spend_key,
            SubWallet::new(public_spend_key, None, address.clone(), scan_height, 0, false),
        );
        state.public_spend_keys.push(public_spend_key);

        Ok(address)
    }

    /// Remove an address and its share of the transaction history
    pub fn delete_sub_wallet(&self, address: &str) -> WalletResult<()> {
        let spend_key = self.public_spend_key_for(address)?;
        let mut state = self.state.lock();

        let is_primary = state
            .sub_wallets
            .get(&spend_key)
            .map(|sub| sub.is_primary_address())
            .ok_or_else(|| WalletError::AddressNotInWallet(address.to_string()))?;
        if is_primary {
            return Err(WalletError::CannotDeletePrimaryAddress);
        }

        state.sub_wallets.remove(&spend_key);
        state.public_spend_keys.retain(|key| *key != spend_key);
        delete_address_transactions(&mut state.transactions, &spend_key);
        delete_address_transactions(&mut state.locked_transactions, &spend_key);
        info!(address, "Deleted subwallet");

        Ok(())
    }

    /// Spend key of one of our addresses
    pub fn public_spend_key_for(&self, address: &str) -> WalletResult<PublicKey> {
        let decoded = Address::decode(address, self.network.address_prefix)?;
        let state = self.state.lock();
        if state.sub_wallets.contains_key(&decoded.public_spend_key) {
            Ok(decoded.public_spend_key)
        } else {
            Err(WalletError::AddressNotInWallet(address.to_string()))
        }
    }

    pub fn primary_address(&self) -> String {
        let state = self.state.lock();
        state
            .public_spend_keys
            .first()
            .and_then(|key| state.sub_wallets.get(key))
            .map(|sub| sub.address().to_string())
            .unwrap_or_default()
    }

    /// Addresses in creation order
    pub fn addresses(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .public_spend_keys
            .iter()
            .filter_map(|key| state.sub_wallets.get(key))
            .map(|sub| sub.address().to_string())
            .collect()
    }

    pub fn wallet_count(&self) -> usize {
        self.state.lock().sub_wallets.len()
    }

    pub fn public_spend_keys(&self) -> Vec<PublicKey> {
        self.state.lock().public_spend_keys.clone()
    }

    pub fn private_view_key(&self) -> SecretKey {
        self.state.lock().private_view_key.clone()
    }

    pub fn is_view_wallet(&self) -> bool {
        self.state.lock().is_view_wallet
    }

    pub fn private_spend_key(&self, public_spend_key: &PublicKey) -> WalletResult<SecretKey> {
        let state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let sub = state
            .sub_wallets
            .get(public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(public_spend_key.to_hex()))?;
        sub.private_spend_key()
            .cloned()
            .ok_or(WalletError::IllegalViewWalletOperation)
    }

    /// Where syncing starts: the earliest start over every subwallet.
    ///
    /// Returns `(height, timestamp)` with at most one of them non-zero.
    pub fn min_initial_sync_start(&self) -> (u64, u64) {
        let state = self.state.lock();

        let min_height = state
            .sub_wallets
            .values()
            .map(SubWallet::sync_start_height)
            .min()
            .unwrap_or(0);
        let min_timestamp = state
            .sub_wallets
            .values()
            .map(SubWallet::sync_start_timestamp)
            .min()
            .unwrap_or(0);

        if min_height == 0 || min_timestamp == 0 {
            return (min_height, min_timestamp);
        }

        if self.network.scan_height_to_timestamp(min_height) < min_timestamp {
            (min_height, 0)
        } else {
            (0, min_timestamp)
        }
    }

    pub fn convert_sync_timestamp_to_height(&self, height: u64) {
        let mut state = self.state.lock();
        for sub in state.sub_wallets.values_mut() {
            sub.convert_sync_timestamp_to_height(height);
        }
    }

    /// Record a transaction we sent that has not been seen in a block
    pub fn add_unconfirmed_transaction(&self, transaction: Transaction) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state
            .locked_transactions
            .iter()
            .any(|tx| tx.hash == transaction.hash)
        {
            return Err(WalletError::DuplicateTransaction(transaction.hash.to_hex()));
        }
        state.locked_transactions.push(transaction);
        Ok(())
    }

    /// Record a confirmed transaction, replacing our unconfirmed copy of it
    pub fn add_transaction(&self, transaction: Transaction) -> WalletResult<()> {
        let mut state = self.state.lock();
        Self::insert_transaction(&mut state, transaction)
    }

    fn insert_transaction(state: &mut SubWalletsState, transaction: Transaction) -> WalletResult<()> {
        if state.transactions.iter().any(|tx| tx.hash == transaction.hash) {
            return Err(WalletError::DuplicateTransaction(transaction.hash.to_hex()));
        }
        state
            .locked_transactions
            .retain(|tx| tx.hash != transaction.hash);
        state.transactions.push(transaction);
        Ok(())
    }

    /// Derive the key image (unless view-only) and store the input
    pub fn complete_and_store_input(
        &self,
        public_spend_key: &PublicKey,
        derivation: &KeyDerivation,
        output_index: u64,
        input: TransactionInput,
    ) -> WalletResult<()> {
        let mut state = self.state.lock();
        let sub = state
            .sub_wallets
            .get_mut(public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(public_spend_key.to_hex()))?;
        sub.complete_and_store_input(derivation, output_index, input)
    }

    pub fn store_transaction_input(
        &self,
        public_spend_key: &PublicKey,
        input: TransactionInput,
    ) -> WalletResult<()> {
        let mut state = self.state.lock();
        let sub = state
            .sub_wallets
            .get_mut(public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(public_spend_key.to_hex()))?;
        sub.store_transaction_input(input);
        Ok(())
    }

    pub fn store_unconfirmed_incoming_input(
        &self,
        public_spend_key: &PublicKey,
        input: UnconfirmedInput,
    ) {
        let mut state = self.state.lock();
        if let Some(sub) = state.sub_wallets.get_mut(public_spend_key) {
            sub.store_unconfirmed_incoming_input(input);
        }
    }

    /// Spend key of the subwallet that can spend `key_image`
    pub fn key_image_owner(&self, key_image: &KeyImage) -> Option<PublicKey> {
        let state = self.state.lock();
        Self::find_key_image_owner(&state, key_image)
    }

    fn find_key_image_owner(state: &SubWalletsState, key_image: &KeyImage) -> Option<PublicKey> {
        state
            .sub_wallets
            .values()
            .find(|sub| sub.has_key_image(key_image))
            .map(|sub| *sub.public_spend_key())
    }

    pub fn mark_input_as_spent(
        &self,
        key_image: &KeyImage,
        public_spend_key: &PublicKey,
        spend_height: u64,
    ) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let sub = state
            .sub_wallets
            .get_mut(public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(public_spend_key.to_hex()))?;
        if !sub.mark_input_as_spent(key_image, spend_height) {
            warn!(key_image = %key_image, "Spent key image not found in subwallet");
        }
        Ok(())
    }

    /// Lock an input consumed by our unconfirmed transaction `spending_transaction_hash`
    pub fn mark_input_as_locked(
        &self,
        key_image: &KeyImage,
        public_spend_key: &PublicKey,
        spending_transaction_hash: Hash,
    ) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let sub = state
            .sub_wallets
            .get_mut(public_spend_key)
            .ok_or_else(|| WalletError::AddressNotInWallet(public_spend_key.to_hex()))?;
        if !sub.mark_input_as_locked(key_image, spending_transaction_hash) {
            warn!(key_image = %key_image, "Locked key image not found in subwallet");
        }
        Ok(())
    }

    /// Apply everything scanned from one block under a single lock.
    ///
    /// Key images are derived for the whole block before anything is
    /// stored, so an error leaves the wallet exactly as it was. Returns the
    /// transactions that were recorded, for notification.
    pub fn apply_scanned_transactions(
        &self,
        scanned: Vec<ScannedTransaction>,
    ) -> WalletResult<Vec<Transaction>> {
        let mut state = self.state.lock();

        let mut in_block = HashSet::new();
        let mut pending = Vec::with_capacity(scanned.len());
        for mut scanned_tx in scanned {
            let already_recorded = state.transactions.iter().any(|tx| tx.hash == scanned_tx.hash);
            if already_recorded || !in_block.insert(scanned_tx.hash) {
                warn!(hash = %scanned_tx.hash, "Transaction already recorded, skipping");
                continue;
            }
            for owned in &mut scanned_tx.owned_outputs {
                if let Some(sub) = state.sub_wallets.get(&owned.public_spend_key) {
                    sub.complete_input(&owned.derivation, owned.output_index, &mut owned.input)?;
                }
            }
            pending.push(scanned_tx);
        }

        let mut recorded = Vec::new();
        for scanned_tx in pending {
            let mut transfers: BTreeMap<PublicKey, i64> = BTreeMap::new();

            for owned in scanned_tx.owned_outputs {
                let Some(sub) = state.sub_wallets.get_mut(&owned.public_spend_key) else {
                    continue;
                };
                let amount = signed(owned.input.amount);
                sub.store_transaction_input(owned.input);
                let entry = transfers.entry(owned.public_spend_key).or_default();
                *entry = entry.saturating_add(amount);
            }

            // View wallets hold no key images, so cannot see their spends
            if !state.is_view_wallet {
                for (key_image, amount) in &scanned_tx.spent_key_images {
                    let Some(owner) = Self::find_key_image_owner(&state, key_image) else {
                        continue;
                    };
                    if let Some(sub) = state.sub_wallets.get_mut(&owner) {
                        sub.mark_input_as_spent(key_image, scanned_tx.block_height);
                    }
                    let entry = transfers.entry(owner).or_default();
                    *entry = entry.saturating_sub(signed(*amount));
                }
            }

            if transfers.is_empty() {
                continue;
            }

            let transaction = Transaction {
                transfers,
                hash: scanned_tx.hash,
                fee: scanned_tx.fee,
                block_height: scanned_tx.block_height,
                timestamp: scanned_tx.timestamp,
                payment_id: scanned_tx.payment_id,
                unlock_time: scanned_tx.unlock_time,
                is_coinbase: scanned_tx.is_coinbase,
            };
            debug!(
                hash = %transaction.hash,
                height = transaction.block_height,
                amount = transaction.total_amount(),
                "Recorded transaction"
            );
            state
                .locked_transactions
                .retain(|tx| tx.hash != transaction.hash);
            state.transactions.push(transaction.clone());
            recorded.push(transaction);
        }

        Ok(recorded)
    }

    /// Undo every transaction and input at or above `fork_height`
    pub fn invalidate_transactions(&self, fork_height: u64) {
        let mut state = self.state.lock();
        let before = state.transactions.len();
        state
            .transactions
            .retain(|tx| tx.block_height < fork_height);
        for sub in state.sub_wallets.values_mut() {
            sub.remove_forked_inputs(fork_height);
        }
        info!(
            fork_height,
            removed = before - state.transactions.len(),
            "Invalidated transactions above fork"
        );
    }

    /// Forget sends the daemon no longer knows about, returning their inputs
    pub fn remove_cancelled_transactions(&self, cancelled: &HashSet<Hash>) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        state
            .locked_transactions
            .retain(|tx| !cancelled.contains(&tx.hash));
        for sub in state.sub_wallets.values_mut() {
            sub.remove_cancelled_transactions(cancelled);
        }
        Ok(())
    }

    pub fn locked_transaction_hashes(&self) -> WalletResult<HashSet<Hash>> {
        let state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        Ok(state.locked_transactions.iter().map(|tx| tx.hash).collect())
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().transactions.clone()
    }

    /// Transactions we sent that are not in a block yet. Incoming pool
    /// transactions are not tracked.
    pub fn unconfirmed_transactions(&self) -> Vec<Transaction> {
        self.state.lock().locked_transactions.clone()
    }

    pub fn store_tx_private_key(&self, hash: Hash, key: SecretKey) {
        self.state.lock().tx_private_keys.insert(hash, key);
    }

    pub fn tx_private_key(&self, hash: &Hash) -> Option<SecretKey> {
        self.state.lock().tx_private_keys.get(hash).cloned()
    }

    /// `(unlocked, locked)` across `sub_wallets_to_take_from`, or every
    /// subwallet when `take_from_all` is set
    pub fn get_balance(
        &self,
        sub_wallets_to_take_from: &[PublicKey],
        take_from_all: bool,
        current_height: u64,
    ) -> WalletResult<(u64, u64)> {
        self.get_balance_at(sub_wallets_to_take_from, take_from_all, current_height, unix_now())
    }

    pub fn get_balance_at(
        &self,
        sub_wallets_to_take_from: &[PublicKey],
        take_from_all: bool,
        current_height: u64,
        now: u64,
    ) -> WalletResult<(u64, u64)> {
        let state = self.state.lock();
        let keys = Self::selected_keys(&state, sub_wallets_to_take_from, take_from_all);

        let mut unlocked = 0u64;
        let mut locked = 0u64;
        for key in &keys {
            let sub = state
                .sub_wallets
                .get(key)
                .ok_or_else(|| WalletError::AddressNotInWallet(key.to_hex()))?;
            let (sub_unlocked, sub_locked) = sub.get_balance(current_height, now, &self.network);
            unlocked = unlocked.saturating_add(sub_unlocked);
            locked = locked.saturating_add(sub_locked);
        }

        Ok((unlocked, locked))
    }

    /// `(address, unlocked, locked)` per subwallet
    pub fn get_balances(&self, current_height: u64) -> Vec<(String, u64, u64)> {
        let state = self.state.lock();
        let now = unix_now();
        state
            .public_spend_keys
            .iter()
            .filter_map(|key| state.sub_wallets.get(key))
            .map(|sub| {
                let (unlocked, locked) = sub.get_balance(current_height, now, &self.network);
                (sub.address().to_string(), unlocked, locked)
            })
            .collect()
    }

    /// Change from our own pending sends, across every subwallet
    pub fn unconfirmed_incoming_balance(&self) -> u64 {
        self.state
            .lock()
            .sub_wallets
            .values()
            .map(SubWallet::unconfirmed_incoming_balance)
            .fold(0u64, u64::saturating_add)
    }

    fn selected_keys(
        state: &SubWalletsState,
        sub_wallets_to_take_from: &[PublicKey],
        take_from_all: bool,
    ) -> Vec<PublicKey> {
        if take_from_all {
            state.public_spend_keys.clone()
        } else {
            sub_wallets_to_take_from.to_vec()
        }
    }

    /// Select unlocked inputs covering `amount`, smallest first.
    ///
    /// Returns the inputs and their sum. Fails with
    /// [`WalletError::NotEnoughUnlockedBalance`] when locked funds would cover
    /// the amount, and [`WalletError::NotEnoughBalance`] when even they would not.
    pub fn get_transaction_inputs_for_amount(
        &self,
        amount: u64,
        take_from_all: bool,
        sub_wallets_to_take_from: &[PublicKey],
        current_height: u64,
    ) -> WalletResult<(Vec<SpendableInput>, u64)> {
        self.get_transaction_inputs_for_amount_at(
            amount,
            take_from_all,
            sub_wallets_to_take_from,
            current_height,
            unix_now(),
        )
    }

    pub fn get_transaction_inputs_for_amount_at(
        &self,
        amount: u64,
        take_from_all: bool,
        sub_wallets_to_take_from: &[PublicKey],
        current_height: u64,
        now: u64,
    ) -> WalletResult<(Vec<SpendableInput>, u64)> {
        let state = self.state.lock();
        if state.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }

        let keys = Self::selected_keys(&state, sub_wallets_to_take_from, take_from_all);
        let mut available = Vec::new();
        let mut unlocked_total: u64 = 0;
        let mut locked_total: u64 = 0;

        for key in &keys {
            let sub = state
                .sub_wallets
                .get(key)
                .ok_or_else(|| WalletError::AddressNotInWallet(key.to_hex()))?;
            let private_spend_key = sub
                .private_spend_key()
                .cloned()
                .ok_or(WalletError::IllegalViewWalletOperation)?;

            let (unlocked, locked) = sub.get_balance(current_height, now, &self.network);
            unlocked_total = unlocked_total.saturating_add(unlocked);
            locked_total = locked_total.saturating_add(locked);

            available.extend(sub.spendable_inputs(current_height, now, &self.network).map(
                |input| SpendableInput {
                    input: input.clone(),
                    public_spend_key: *key,
                    private_spend_key: private_spend_key.clone(),
                },
            ));
        }

        available.sort_by(|a, b| {
            a.input
                .amount
                .cmp(&b.input.amount)
                .then_with(|| a.input.key.cmp(&b.input.key))
        });

        let mut found: u64 = 0;
        let mut selected = Vec::new();
        for candidate in available {
            found = found.saturating_add(candidate.input.amount);
            selected.push(candidate);
            if found >= amount {
                return Ok((selected, found));
            }
        }

        let total = unlocked_total.saturating_add(locked_total);
        if total >= amount {
            Err(WalletError::NotEnoughUnlockedBalance {
                required: amount,
                unlocked: unlocked_total,
                total,
            })
        } else {
            Err(WalletError::NotEnoughBalance {
                required: amount,
                available: total,
            })
        }
    }

    /// Fill in global output indexes fetched for the inputs about to be spent
    pub fn set_global_output_indexes(&self, indexes: &HashMap<PublicKey, u64>) {
        let mut state = self.state.lock();
        for sub in state.sub_wallets.values_mut() {
            for (key, index) in indexes {
                sub.set_global_output_index(key, *index);
            }
        }
    }

    /// Rescan from `scan_height` without discarding history below it
    pub fn reset(&self, scan_height: u64) {
        let mut state = self.state.lock();
        state.locked_transactions.clear();
        state
            .transactions
            .retain(|tx| tx.block_height < scan_height);
        for sub in state.sub_wallets.values_mut() {
            sub.reset(scan_height);
        }
        info!(scan_height, "Wallet state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_derivation;
    use proptest::prelude::*;

    fn wallet() -> SubWallets {
        let (_, spend) = generate_keys();
        let (_, view) = generate_keys();
        SubWallets::new(spend, view, 0, false, NetworkParameters::default()).unwrap()
    }

    fn input(seed: u8, amount: u64, block_height: u64, unlock_time: u64) -> TransactionInput {
        TransactionInput {
            key_image: Some(KeyImage::from_bytes([seed; 32])),
            amount,
            block_height,
            transaction_public_key: PublicKey::default(),
            transaction_index: 0,
            global_output_index: None,
            key: PublicKey::from_bytes([seed; 32]),
            spend_height: None,
            unlock_time,
            parent_transaction_hash: Hash::from_bytes([seed; 32]),
            spending_transaction_hash: None,
        }
    }

    fn transaction(seed: u8, height: u64, transfers: &[(PublicKey, i64)]) -> Transaction {
        Transaction {
            transfers: transfers.iter().copied().collect(),
            hash: Hash::from_bytes([seed; 32]),
            fee: 10,
            block_height: height,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        }
    }

    fn primary_key(wallets: &SubWallets) -> PublicKey {
        wallets.public_spend_keys()[0]
    }

    #[test]
    fn test_addresses_and_subwallet_lifecycle() {
        let wallets = wallet();
        let primary = wallets.primary_address();
        assert_eq!(wallets.addresses(), vec![primary.clone()]);

        let (address, _) = wallets.add_sub_wallet().unwrap();
        assert_eq!(wallets.wallet_count(), 2);
        assert_eq!(wallets.addresses()[1], address);

        assert_eq!(
            wallets.delete_sub_wallet(&primary),
            Err(WalletError::CannotDeletePrimaryAddress)
        );
        wallets.delete_sub_wallet(&address).unwrap();
        assert_eq!(wallets.wallet_count(), 1);
        assert!(matches!(
            wallets.delete_sub_wallet(&address),
            Err(WalletError::AddressNotInWallet(_))
        ));
    }

    #[test]
    fn test_import_duplicate_rejected() {
        let wallets = wallet();
        let (_, spend) = generate_keys();
        wallets.import_sub_wallet(spend.clone(), 100).unwrap();
        assert_eq!(
            wallets.import_sub_wallet(spend, 100),
            Err(WalletError::SubWalletAlreadyExists)
        );
        let (public, _) = generate_keys();
        assert_eq!(
            wallets.import_view_sub_wallet(public, 0),
            Err(WalletError::IllegalNonViewWalletOperation)
        );
    }

    #[test]
    fn test_delete_strips_transfers() {
        let wallets = wallet();
        let (address, _) = wallets.add_sub_wallet().unwrap();
        let primary = primary_key(&wallets);
        let other = wallets.public_spend_key_for(&address).unwrap();

        wallets
            .add_transaction(transaction(1, 10, &[(primary, 5), (other, 7)]))
            .unwrap();
        wallets.add_transaction(transaction(2, 11, &[(other, 3)])).unwrap();
        wallets.delete_sub_wallet(&address).unwrap();

        let transactions = wallets.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transfers.len(), 1);
        assert_eq!(transactions[0].transfers[&primary], 5);
    }

    #[test]
    fn test_view_wallet_restrictions() {
        let (spend_public, _) = generate_keys();
        let (view_public, view_secret) = generate_keys();
        let network = NetworkParameters::default();
        let address = Address::new(spend_public, view_public).encode(network.address_prefix);

        let wallets =
            SubWallets::new_view_wallet(view_secret, &address, 0, false, network).unwrap();
        assert!(wallets.is_view_wallet());
        assert_eq!(wallets.primary_address(), address);
        assert_eq!(
            wallets.add_sub_wallet().map(|(a, _)| a),
            Err(WalletError::IllegalViewWalletOperation)
        );
        assert_eq!(
            wallets
                .get_transaction_inputs_for_amount(1, true, &[], 0)
                .map(|(_, found)| found),
            Err(WalletError::IllegalViewWalletOperation)
        );
        assert_eq!(
            wallets.locked_transaction_hashes(),
            Err(WalletError::IllegalViewWalletOperation)
        );
    }

    #[test]
    fn test_view_wallet_requires_matching_view_key() {
        let (spend_public, _) = generate_keys();
        let (view_public, _) = generate_keys();
        let (_, other_view_secret) = generate_keys();
        let network = NetworkParameters::default();
        let address = Address::new(spend_public, view_public).encode(network.address_prefix);

        assert!(matches!(
            SubWallets::new_view_wallet(other_view_secret, &address, 0, false, network),
            Err(WalletError::AddressNotValid)
        ));
    }

    #[test]
    fn test_duplicate_transactions_rejected() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets
            .add_unconfirmed_transaction(transaction(1, 0, &[(key, -50)]))
            .unwrap();
        assert!(matches!(
            wallets.add_unconfirmed_transaction(transaction(1, 0, &[(key, -50)])),
            Err(WalletError::DuplicateTransaction(_))
        ));

        // Confirmation replaces the unconfirmed copy
        wallets.add_transaction(transaction(1, 20, &[(key, -50)])).unwrap();
        assert!(wallets.unconfirmed_transactions().is_empty());
        assert!(matches!(
            wallets.add_transaction(transaction(1, 20, &[(key, -50)])),
            Err(WalletError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_input_selection_smallest_first() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        for (seed, amount) in [(1, 500), (2, 20), (3, 100), (4, 50)] {
            wallets.store_transaction_input(&key, input(seed, amount, 5, 0)).unwrap();
        }

        let (selected, found) = wallets
            .get_transaction_inputs_for_amount_at(120, true, &[], 100, 0)
            .unwrap();
        let amounts: Vec<u64> = selected.iter().map(|s| s.input.amount).collect();
        assert_eq!(amounts, vec![20, 50, 100]);
        assert_eq!(found, 170);
    }

    #[test]
    fn test_input_selection_errors_are_distinct() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.store_transaction_input(&key, input(1, 100, 5, 0)).unwrap();
        // Unlocks at height 1000
        wallets.store_transaction_input(&key, input(2, 400, 5, 1000)).unwrap();
        // Locked by a pending send
        wallets.store_transaction_input(&key, input(3, 300, 5, 0)).unwrap();
        wallets
            .mark_input_as_locked(&KeyImage::from_bytes([3; 32]), &key, Hash::from_bytes([9; 32]))
            .unwrap();

        assert_eq!(
            wallets.get_transaction_inputs_for_amount_at(450, true, &[], 100, 0),
            Err(WalletError::NotEnoughUnlockedBalance {
                required: 450,
                unlocked: 100,
                total: 500,
            })
        );
        assert_eq!(
            wallets.get_transaction_inputs_for_amount_at(900, true, &[], 100, 0),
            Err(WalletError::NotEnoughBalance {
                required: 900,
                available: 500,
            })
        );

        // The pending send's input is never selected
        let (selected, _) = wallets
            .get_transaction_inputs_for_amount_at(100, true, &[], 100, 0)
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].input.amount, 100);
    }

    #[test]
    fn test_min_initial_sync_start() {
        let network = NetworkParameters::default();
        let wallets = wallet();
        wallets.import_sub_wallet(generate_keys().1, 400_000).unwrap();
        // The restored primary starts at zero
        assert_eq!(wallets.min_initial_sync_start(), (0, 0));

        let (_, spend) = generate_keys();
        let (_, view) = generate_keys();
        let wallets = SubWallets::new(spend, view, 400_000, false, network.clone()).unwrap();
        assert_eq!(wallets.min_initial_sync_start(), (400_000, 0));

        // A new wallet starts from a timestamp
        let (_, spend) = generate_keys();
        let (_, view) = generate_keys();
        let wallets = SubWallets::new(spend, view, 0, true, network).unwrap();
        let (height, timestamp) = wallets.min_initial_sync_start();
        assert_eq!(height, 0);
        assert!(timestamp > 0);

        wallets.convert_sync_timestamp_to_height(123);
        assert_eq!(wallets.min_initial_sync_start(), (123, 0));
    }

    #[test]
    fn test_apply_scanned_transactions() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        let derivation = generate_key_derivation(&key, &wallets.private_view_key()).unwrap();

        let receive = ScannedTransaction {
            hash: Hash::from_bytes([1; 32]),
            owned_outputs: vec![OwnedOutput {
                public_spend_key: key,
                derivation,
                output_index: 0,
                input: TransactionInput {
                    key_image: None,
                    ..input(9, 1000, 10, 0)
                },
            }],
            spent_key_images: Vec::new(),
            fee: 0,
            block_height: 10,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: true,
        };
        let recorded = wallets.apply_scanned_transactions(vec![receive]).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].transfers[&key], 1000);

        // The key image was derived on store
        let snapshot = wallets.snapshot();
        let stored = &snapshot.sub_wallets[&key].unspent_inputs()[0];
        let key_image = stored.key_image.expect("key image derived");
        assert_eq!(wallets.key_image_owner(&key_image), Some(key));

        let spend = ScannedTransaction {
            hash: Hash::from_bytes([2; 32]),
            owned_outputs: Vec::new(),
            spent_key_images: vec![(key_image, 1000), (KeyImage::from_bytes([7; 32]), 5)],
            fee: 10,
            block_height: 12,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        };
        let recorded = wallets.apply_scanned_transactions(vec![spend.clone()]).unwrap();
        assert_eq!(recorded[0].transfers[&key], -1000);
        assert_eq!(wallets.get_balance_at(&[], true, 100, 0).unwrap(), (0, 0));

        // Reapplying is skipped rather than double counted
        assert!(wallets.apply_scanned_transactions(vec![spend]).unwrap().is_empty());
        assert_eq!(wallets.transactions().len(), 2);
    }

    #[test]
    fn test_failed_block_leaves_wallet_untouched() {
        let healthy = wallet();
        let mut state = healthy.snapshot();
        let primary = state.public_spend_keys[0];

        // A subwallet whose spend key cannot produce key images
        let (broken, _) = generate_keys();
        let broken_sub = SubWallet::new(
            broken,
            Some(SecretKey::from_bytes([0xff; 32])),
            "broken".to_string(),
            0,
            0,
            false,
        );
        state.public_spend_keys.push(broken);
        state.sub_wallets.insert(broken, broken_sub);
        let wallets = SubWallets::from_state(state, NetworkParameters::default());

        let derivation = generate_key_derivation(&primary, &wallets.private_view_key()).unwrap();
        let paying = |seed: u8, key: PublicKey| ScannedTransaction {
            hash: Hash::from_bytes([seed; 32]),
            owned_outputs: vec![OwnedOutput {
                public_spend_key: key,
                derivation,
                output_index: 0,
                input: TransactionInput {
                    key_image: None,
                    ..input(seed, 500, 20, 0)
                },
            }],
            spent_key_images: Vec::new(),
            fee: 10,
            block_height: 20,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        };

        let result = wallets.apply_scanned_transactions(vec![paying(1, primary), paying(2, broken)]);
        assert!(matches!(result, Err(WalletError::Crypto(_))));
        assert!(wallets.transactions().is_empty());
        assert_eq!(wallets.get_balance_at(&[], true, 100, 0).unwrap(), (0, 0));
    }

    #[test]
    fn test_huge_amounts_saturate() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.store_transaction_input(&key, input(1, u64::MAX - 1, 10, 0)).unwrap();
        wallets.store_transaction_input(&key, input(2, u64::MAX - 1, 11, 0)).unwrap();
        wallets.store_transaction_input(&key, input(3, 5, 12, 1_000)).unwrap();

        assert_eq!(
            wallets.get_balance_at(&[], true, 100, 0).unwrap(),
            (u64::MAX, 5)
        );
        let (selected, found) = wallets
            .get_transaction_inputs_for_amount_at(u64::MAX, true, &[], 100, 0)
            .unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(found, u64::MAX);
    }

    #[test]
    fn test_invalidate_transactions_at_fork() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.store_transaction_input(&key, input(1, 100, 500, 0)).unwrap();
        wallets.store_transaction_input(&key, input(2, 200, 999, 0)).unwrap();
        wallets.store_transaction_input(&key, input(3, 300, 1000, 0)).unwrap();
        wallets.add_transaction(transaction(1, 500, &[(key, 100)])).unwrap();
        wallets.add_transaction(transaction(2, 999, &[(key, 200)])).unwrap();
        wallets.add_transaction(transaction(3, 1000, &[(key, 300)])).unwrap();

        wallets.invalidate_transactions(999);

        let heights: Vec<u64> = wallets.transactions().iter().map(|t| t.block_height).collect();
        assert_eq!(heights, vec![500]);
        assert_eq!(wallets.get_balance_at(&[], true, 2000, 0).unwrap(), (100, 0));
    }

    #[test]
    fn test_remove_cancelled_transactions() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.store_transaction_input(&key, input(1, 100, 5, 0)).unwrap();
        let sent = transaction(1, 0, &[(key, -100)]);
        wallets
            .mark_input_as_locked(&KeyImage::from_bytes([1; 32]), &key, sent.hash)
            .unwrap();
        wallets.add_unconfirmed_transaction(sent.clone()).unwrap();
        assert_eq!(
            wallets.locked_transaction_hashes().unwrap(),
            HashSet::from([sent.hash])
        );

        wallets
            .remove_cancelled_transactions(&HashSet::from([sent.hash]))
            .unwrap();
        assert!(wallets.unconfirmed_transactions().is_empty());
        assert_eq!(wallets.get_balance_at(&[], true, 100, 0).unwrap(), (100, 0));
    }

    #[test]
    fn test_reset_keeps_history_below_height() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.store_transaction_input(&key, input(1, 100, 10, 0)).unwrap();
        wallets.store_transaction_input(&key, input(2, 50, 30, 0)).unwrap();
        wallets
            .mark_input_as_spent(&KeyImage::from_bytes([1; 32]), &key, 25)
            .unwrap();
        wallets.add_transaction(transaction(1, 10, &[(key, 100)])).unwrap();
        wallets.add_transaction(transaction(2, 25, &[(key, -100)])).unwrap();
        wallets
            .add_unconfirmed_transaction(transaction(3, 0, &[(key, -1)]))
            .unwrap();

        wallets.reset(20);

        assert_eq!(wallets.transactions().len(), 1);
        assert!(wallets.unconfirmed_transactions().is_empty());
        assert_eq!(wallets.get_balance_at(&[], true, 100, 0).unwrap(), (100, 0));
        assert_eq!(wallets.min_initial_sync_start(), (20, 0));
    }

    #[test]
    fn test_state_serde_round_trip() {
        let wallets = wallet();
        let key = primary_key(&wallets);
        wallets.add_sub_wallet().unwrap();
        wallets.store_transaction_input(&key, input(1, 100, 10, 0)).unwrap();
        wallets.add_transaction(transaction(1, 10, &[(key, 100)])).unwrap();
        wallets.store_tx_private_key(Hash::from_bytes([1; 32]), generate_keys().1);

        let state = wallets.snapshot();
        let json = serde_json::to_string(&state).unwrap();
        let restored: SubWalletsState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["subWallets"].is_object());
        assert!(value["lockedTransactions"].is_array());
    }

    fn arbitrary_input() -> impl Strategy<Value = (u64, u64, u64, Option<u64>)> {
        // (amount, block height, unlock time, spend height offset)
        (
            1u64..1_000_000,
            1u64..2000,
            prop_oneof![Just(0u64), 1u64..3000],
            proptest::option::of(0u64..500),
        )
    }

    proptest! {
        #[test]
        fn prop_balance_partitions_unspent(
            inputs in proptest::collection::vec(arbitrary_input(), 0..40),
            height in 0u64..3000,
        ) {
            let wallets = wallet();
            let key = primary_key(&wallets);
            let network = NetworkParameters::default();
            for (i, (amount, block, unlock, _)) in inputs.iter().enumerate() {
                let mut stored = input(0, *amount, *block, *unlock);
                stored.key = PublicKey::from_bytes([(i + 1) as u8; 32]);
                stored.key_image = Some(KeyImage::from_bytes([(i + 1) as u8; 32]));
                wallets.store_transaction_input(&key, stored).unwrap();
            }

            let (unlocked, locked) = wallets.get_balance_at(&[], true, height, 0).unwrap();
            let snapshot = wallets.snapshot();
            let sub = &snapshot.sub_wallets[&key];
            let total: u64 = sub.unspent_inputs().iter().map(|i| i.amount).sum();
            prop_assert_eq!(unlocked + locked, total);

            let spendable: Vec<_> = sub.spendable_inputs(height, 0, &network).collect();
            prop_assert!(spendable
                .iter()
                .all(|i| crate::wallet::unlock::is_unlocked_at(i.unlock_time, height, 0, &network)));
            prop_assert_eq!(spendable.iter().map(|i| i.amount).sum::<u64>(), unlocked);
        }

        #[test]
        fn prop_reset_correctness(
            inputs in proptest::collection::vec(arbitrary_input(), 0..40),
            reset_height in 0u64..2500,
        ) {
            let wallets = wallet();
            let key = primary_key(&wallets);
            let mut expected_reopened = Vec::new();
            for (i, (amount, block, unlock, spend_offset)) in inputs.iter().enumerate() {
                let seed = (i + 1) as u8;
                let mut stored = input(0, *amount, *block, *unlock);
                stored.key = PublicKey::from_bytes([seed; 32]);
                stored.key_image = Some(KeyImage::from_bytes([seed; 32]));
                wallets.store_transaction_input(&key, stored.clone()).unwrap();
                if let Some(offset) = spend_offset {
                    let spend_height = block + offset;
                    wallets
                        .mark_input_as_spent(&KeyImage::from_bytes([seed; 32]), &key, spend_height)
                        .unwrap();
                    if *block < reset_height && spend_height >= reset_height {
                        expected_reopened.push(stored.key);
                    }
                }
            }

            wallets.reset(reset_height);

            let snapshot = wallets.snapshot();
            let sub = &snapshot.sub_wallets[&key];
            prop_assert!(sub
                .unspent_inputs()
                .iter()
                .chain(sub.spent_inputs())
                .all(|i| i.block_height < reset_height));
            prop_assert!(sub.locked_inputs().is_empty());
            for reopened in expected_reopened {
                let found = sub.unspent_inputs().iter().find(|i| i.key == reopened);
                prop_assert!(found.is_some());
                prop_assert_eq!(found.and_then(|i| i.spend_height), None);
            }
        }
    }
}
