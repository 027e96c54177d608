//! Ledger of a single owned key pair
//!
//! Every owned output lives in exactly one of `unspent_inputs`,
//! `spent_inputs` or `locked_inputs`. Change from our own unconfirmed sends is
//! tracked separately in `unconfirmed_incoming_amounts` until the transaction
//! is seen in a block.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::unlock::is_unlocked_at;
use crate::config::NetworkParameters;
use crate::crypto::generate_key_image_for_output;
use crate::data_structures::{
    Hash, InputStatus, KeyDerivation, KeyImage, PublicKey, SecretKey, TransactionInput,
};
use crate::errors::{WalletError, WalletResult};

/// Change returning to us from a transaction we sent that is not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnconfirmedInput {
    pub amount: u64,
    pub key: PublicKey,
    pub parent_transaction_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWallet {
    public_spend_key: PublicKey,
    /// Absent for view-only subwallets
    #[serde(default)]
    private_spend_key: Option<SecretKey>,
    address: String,
    sync_start_height: u64,
    sync_start_timestamp: u64,
    #[serde(default)]
    unspent_inputs: Vec<TransactionInput>,
    #[serde(default)]
    locked_inputs: Vec<TransactionInput>,
    #[serde(default)]
    spent_inputs: Vec<TransactionInput>,
    #[serde(default)]
    unconfirmed_incoming_amounts: Vec<UnconfirmedInput>,
    is_primary_address: bool,
}

impl SubWallet {
    pub fn new(
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        address: String,
        sync_start_height: u64,
        sync_start_timestamp: u64,
        is_primary_address: bool,
    ) -> Self {
        Self {
            public_spend_key,
            private_spend_key,
            address,
            sync_start_height,
            sync_start_timestamp,
            unspent_inputs: Vec::new(),
            locked_inputs: Vec::new(),
            spent_inputs: Vec::new(),
            unconfirmed_incoming_amounts: Vec::new(),
            is_primary_address,
        }
    }

    pub fn public_spend_key(&self) -> &PublicKey {
        &self.public_spend_key
    }

    pub fn private_spend_key(&self) -> Option<&SecretKey> {
        self.private_spend_key.as_ref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_primary_address(&self) -> bool {
        self.is_primary_address
    }

    pub fn is_view_only(&self) -> bool {
        self.private_spend_key.is_none()
    }

    pub fn sync_start_height(&self) -> u64 {
        self.sync_start_height
    }

    pub fn sync_start_timestamp(&self) -> u64 {
        self.sync_start_timestamp
    }

    pub fn unspent_inputs(&self) -> &[TransactionInput] {
        &self.unspent_inputs
    }

    pub fn spent_inputs(&self) -> &[TransactionInput] {
        &self.spent_inputs
    }

    pub fn locked_inputs(&self) -> &[TransactionInput] {
        &self.locked_inputs
    }

    pub fn unconfirmed_incoming_amounts(&self) -> &[UnconfirmedInput] {
        &self.unconfirmed_incoming_amounts
    }

    /// Key image of our output `output_index` under `derivation`
    pub fn generate_key_image(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
    ) -> WalletResult<KeyImage> {
        let private_spend_key = self
            .private_spend_key
            .as_ref()
            .ok_or(WalletError::IllegalViewWalletOperation)?;
        Ok(generate_key_image_for_output(
            derivation,
            output_index,
            &self.public_spend_key,
            private_spend_key,
        )?)
    }

    /// Fill in the key image of `input`, unless view-only. Nothing is stored.
    pub fn complete_input(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        input: &mut TransactionInput,
    ) -> WalletResult<()> {
        if !self.is_view_only() {
            input.key_image = Some(self.generate_key_image(derivation, output_index)?);
        }
        Ok(())
    }

    /// Fill in the key image (unless view-only) and store the input as unspent
    pub fn complete_and_store_input(
        &mut self,
        derivation: &KeyDerivation,
        output_index: u64,
        mut input: TransactionInput,
    ) -> WalletResult<()> {
        self.complete_input(derivation, output_index, &mut input)?;
        self.store_transaction_input(input);
        Ok(())
    }

    /// Store a newly received output. An output we already hold is ignored.
    pub fn store_transaction_input(&mut self, input: TransactionInput) {
        if self.status_of(&input).is_some() {
            return;
        }

        // Our own change has now been confirmed
        self.unconfirmed_incoming_amounts
            .retain(|unconfirmed| unconfirmed.key != input.key);

        self.unspent_inputs.push(input);
    }

    pub fn store_unconfirmed_incoming_input(&mut self, input: UnconfirmedInput) {
        self.unconfirmed_incoming_amounts.push(input);
    }

    /// Which set holds this output, if any
    pub fn status_of(&self, input: &TransactionInput) -> Option<InputStatus> {
        if self.unspent_inputs.iter().any(|i| i.same_output(input)) {
            Some(InputStatus::Unspent)
        } else if self.spent_inputs.iter().any(|i| i.same_output(input)) {
            Some(InputStatus::Spent)
        } else if self.locked_inputs.iter().any(|i| i.same_output(input)) {
            Some(InputStatus::Locked)
        } else {
            None
        }
    }

    /// Whether this key image belongs to an output we can still spend
    pub fn has_key_image(&self, key_image: &KeyImage) -> bool {
        let matches = |input: &TransactionInput| input.key_image.as_ref() == Some(key_image);
        self.unspent_inputs.iter().any(matches) || self.locked_inputs.iter().any(matches)
    }

    /// Move the output with `key_image` from unspent or locked to spent
    pub fn mark_input_as_spent(&mut self, key_image: &KeyImage, spend_height: u64) -> bool {
        let matches = |input: &TransactionInput| input.key_image.as_ref() == Some(key_image);

        let taken = match self.unspent_inputs.iter().position(matches) {
            Some(position) => Some(self.unspent_inputs.remove(position)),
            None => self
                .locked_inputs
                .iter()
                .position(matches)
                .map(|position| self.locked_inputs.remove(position)),
        };

        match taken {
            Some(mut input) => {
                input.spend_height = Some(spend_height);
                self.spent_inputs.push(input);
                true
            }
            None => false,
        }
    }

    /// Move the output with `key_image` from unspent to locked, consumed by
    /// our unconfirmed transaction `spending_transaction_hash`
    pub fn mark_input_as_locked(
        &mut self,
        key_image: &KeyImage,
        spending_transaction_hash: Hash,
    ) -> bool {
        let position = self
            .unspent_inputs
            .iter()
            .position(|input| input.key_image.as_ref() == Some(key_image));

        match position {
            Some(position) => {
                let mut input = self.unspent_inputs.remove(position);
                input.spending_transaction_hash = Some(spending_transaction_hash);
                self.locked_inputs.push(input);
                true
            }
            None => false,
        }
    }

    /// Undo everything at or above `fork_height`.
    ///
    /// Locked inputs received below the fork stay locked: the send that
    /// consumed them may still confirm on the new chain.
    pub fn remove_forked_inputs(&mut self, fork_height: u64) {
        self.locked_inputs
            .retain(|input| input.block_height < fork_height);
        self.rewind_inputs(fork_height);
    }

    /// Partial rescan from `scan_height`
    pub fn reset(&mut self, scan_height: u64) {
        self.sync_start_timestamp = 0;
        self.sync_start_height = scan_height;
        self.locked_inputs.clear();
        self.unconfirmed_incoming_amounts.clear();
        self.rewind_inputs(scan_height);
    }

    /// Drop inputs received at or above `height`, and reopen inputs
    /// received below it but spent at or above it
    fn rewind_inputs(&mut self, height: u64) {
        self.unspent_inputs.retain(|input| input.block_height < height);
        self.spent_inputs.retain(|input| input.block_height < height);

        let (reopened, still_spent): (Vec<_>, Vec<_>) = std::mem::take(&mut self.spent_inputs)
            .into_iter()
            .partition(|input| input.spend_height.is_some_and(|spent| spent >= height));

        self.spent_inputs = still_spent;
        self.unspent_inputs
            .extend(reopened.into_iter().map(|mut input| {
                input.spend_height = None;
                input.spending_transaction_hash = None;
                input
            }));
    }

    /// Return inputs locked by cancelled sends to unspent and forget change
    /// those sends would have paid us
    pub fn remove_cancelled_transactions(&mut self, cancelled: &HashSet<Hash>) {
        let (returned, still_locked): (Vec<_>, Vec<_>) = std::mem::take(&mut self.locked_inputs)
            .into_iter()
            .partition(|input| {
                input
                    .spending_transaction_hash
                    .is_some_and(|hash| cancelled.contains(&hash))
            });

        self.locked_inputs = still_locked;
        self.unspent_inputs
            .extend(returned.into_iter().map(|mut input| {
                input.spend_height = None;
                input.spending_transaction_hash = None;
                input
            }));

        self.unconfirmed_incoming_amounts
            .retain(|input| !cancelled.contains(&input.parent_transaction_hash));
    }

    /// `(unlocked, locked)` over unspent inputs
    pub fn get_balance(&self, current_height: u64, now: u64, network: &NetworkParameters) -> (u64, u64) {
        self.unspent_inputs
            .iter()
            .fold((0u64, 0u64), |(unlocked, locked), input| {
                if is_unlocked_at(input.unlock_time, current_height, now, network) {
                    (unlocked.saturating_add(input.amount), locked)
                } else {
                    (unlocked, locked.saturating_add(input.amount))
                }
            })
    }

    /// Change from our own pending sends
    pub fn unconfirmed_incoming_balance(&self) -> u64 {
        self.unconfirmed_incoming_amounts
            .iter()
            .fold(0u64, |total, i| total.saturating_add(i.amount))
    }

    /// Unspent inputs whose unlock time has passed
    pub fn spendable_inputs(
        &self,
        current_height: u64,
        now: u64,
        network: &NetworkParameters,
    ) -> impl Iterator<Item = &TransactionInput> + '_ {
        let network = network.clone();
        self.unspent_inputs
            .iter()
            .filter(move |input| is_unlocked_at(input.unlock_time, current_height, now, &network))
    }

    /// Record a global output index fetched after the input was stored
    pub fn set_global_output_index(&mut self, key: &PublicKey, index: u64) {
        for input in self
            .unspent_inputs
            .iter_mut()
            .chain(self.locked_inputs.iter_mut())
            .filter(|input| input.key == *key)
        {
            input.global_output_index = Some(index);
        }
    }

    /// Replace a timestamp based start with the height it resolved to
    pub fn convert_sync_timestamp_to_height(&mut self, height: u64) {
        if self.sync_start_timestamp != 0 {
            self.sync_start_timestamp = 0;
            self.sync_start_height = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keys;

    fn input(key: u8, amount: u64, block_height: u64, unlock_time: u64) -> TransactionInput {
        TransactionInput {
            key_image: Some(KeyImage::from_bytes([key; 32])),
            amount,
            block_height,
            transaction_public_key: PublicKey::default(),
            transaction_index: 0,
            global_output_index: None,
            key: PublicKey::from_bytes([key; 32]),
            spend_height: None,
            unlock_time,
            parent_transaction_hash: Hash::from_bytes([key; 32]),
            spending_transaction_hash: None,
        }
    }

    fn wallet() -> SubWallet {
        let (public, secret) = generate_keys();
        SubWallet::new(public, Some(secret), "addr".into(), 0, 0, true)
    }

    fn image(key: u8) -> KeyImage {
        KeyImage::from_bytes([key; 32])
    }

    #[test]
    fn test_store_is_idempotent() {
        let mut sub = wallet();
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(1, 100, 10, 0));
        assert_eq!(sub.unspent_inputs().len(), 1);
    }

    #[test]
    fn test_spend_and_lock_transitions() {
        let mut sub = wallet();
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(2, 50, 11, 0));

        assert!(sub.mark_input_as_locked(&image(2), Hash::from_bytes([0xaa; 32])));
        assert_eq!(sub.status_of(&input(2, 50, 11, 0)), Some(InputStatus::Locked));
        assert!(sub.has_key_image(&image(2)));

        // Locked inputs can be confirmed spent
        assert!(sub.mark_input_as_spent(&image(2), 20));
        assert!(sub.mark_input_as_spent(&image(1), 21));
        assert!(!sub.mark_input_as_spent(&image(9), 21));

        assert!(sub.unspent_inputs().is_empty());
        assert!(sub.locked_inputs().is_empty());
        assert_eq!(sub.spent_inputs().len(), 2);
        assert!(!sub.has_key_image(&image(1)));
    }

    #[test]
    fn test_view_only_cannot_generate_key_images() {
        let (public, _) = generate_keys();
        let mut sub = SubWallet::new(public, None, "addr".into(), 0, 0, true);
        assert!(sub.is_view_only());
        assert_eq!(
            sub.generate_key_image(&KeyDerivation::default(), 0),
            Err(WalletError::IllegalViewWalletOperation)
        );

        // Still recorded for balance purposes
        let mut received = input(1, 100, 10, 0);
        received.key_image = None;
        sub.complete_and_store_input(&KeyDerivation::default(), 0, received)
            .unwrap();
        assert_eq!(sub.unspent_inputs()[0].key_image, None);
    }

    #[test]
    fn test_balance_partition() {
        let network = NetworkParameters::default();
        let mut sub = wallet();
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(2, 40, 10, 500));
        sub.store_transaction_input(input(3, 7, 10, 50));

        let (unlocked, locked) = sub.get_balance(100, 0, &network);
        assert_eq!(unlocked, 107);
        assert_eq!(locked, 40);

        let spendable: u64 = sub.spendable_inputs(100, 0, &network).map(|i| i.amount).sum();
        assert_eq!(spendable, unlocked);
    }

    #[test]
    fn test_reset_reopens_spends_above_height() {
        let mut sub = wallet();
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(2, 50, 30, 0));
        sub.store_transaction_input(input(3, 25, 12, 0));
        sub.store_transaction_input(input(4, 5, 13, 0));
        sub.mark_input_as_spent(&image(1), 25);
        sub.mark_input_as_spent(&image(3), 15);
        sub.mark_input_as_locked(&image(4), Hash::from_bytes([0xaa; 32]));

        sub.reset(20);

        // Received at 30: dropped. Received 10, spent 25: reopened.
        // Received 12, spent 15: still spent. Locked: dropped.
        let unspent: Vec<u64> = sub.unspent_inputs().iter().map(|i| i.amount).collect();
        assert_eq!(unspent, vec![100]);
        assert_eq!(sub.unspent_inputs()[0].spend_height, None);
        assert_eq!(sub.spent_inputs().len(), 1);
        assert_eq!(sub.spent_inputs()[0].amount, 25);
        assert!(sub.locked_inputs().is_empty());
        assert_eq!(sub.sync_start_height(), 20);
    }

    #[test]
    fn test_forked_inputs_removed() {
        let mut sub = wallet();
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(2, 50, 999, 0));
        sub.store_transaction_input(input(3, 20, 11, 0));
        sub.store_transaction_input(input(4, 60, 1000, 0));
        sub.mark_input_as_spent(&image(1), 1000);
        sub.mark_input_as_locked(&image(3), Hash::from_bytes([0xaa; 32]));
        sub.mark_input_as_locked(&image(4), Hash::from_bytes([0xaa; 32]));

        sub.remove_forked_inputs(999);

        let mut unspent: Vec<u64> = sub.unspent_inputs().iter().map(|i| i.amount).collect();
        unspent.sort_unstable();
        assert_eq!(unspent, vec![100]);
        assert!(sub.spent_inputs().is_empty());
        let locked: Vec<u64> = sub.locked_inputs().iter().map(|i| i.amount).collect();
        assert_eq!(locked, vec![20]);
    }

    #[test]
    fn test_remove_cancelled_returns_locked_inputs() {
        let mut sub = wallet();
        let sent = Hash::from_bytes([0xbb; 32]);
        sub.store_transaction_input(input(1, 100, 10, 0));
        sub.store_transaction_input(input(2, 70, 10, 0));
        sub.mark_input_as_locked(&image(1), sent);
        sub.mark_input_as_locked(&image(2), Hash::from_bytes([0xcc; 32]));
        sub.store_unconfirmed_incoming_input(UnconfirmedInput {
            amount: 30,
            key: PublicKey::from_bytes([8; 32]),
            parent_transaction_hash: sent,
        });
        assert_eq!(sub.unconfirmed_incoming_balance(), 30);

        let cancelled: HashSet<Hash> = [sent].into_iter().collect();
        sub.remove_cancelled_transactions(&cancelled);

        assert_eq!(sub.unspent_inputs().len(), 1);
        assert_eq!(sub.unspent_inputs()[0].spending_transaction_hash, None);
        // Locked by a different send
        assert_eq!(sub.locked_inputs().len(), 1);
        assert_eq!(sub.unconfirmed_incoming_balance(), 0);
    }

    #[test]
    fn test_confirmed_change_clears_unconfirmed() {
        let mut sub = wallet();
        let change = input(5, 30, 40, 0);
        sub.store_unconfirmed_incoming_input(UnconfirmedInput {
            amount: 30,
            key: change.key,
            parent_transaction_hash: change.parent_transaction_hash,
        });
        sub.store_transaction_input(change);
        assert_eq!(sub.unconfirmed_incoming_balance(), 0);
        assert_eq!(sub.unspent_inputs().len(), 1);
    }

    #[test]
    fn test_timestamp_conversion_only_once() {
        let (public, secret) = generate_keys();
        let mut sub = SubWallet::new(public, Some(secret), "addr".into(), 0, 1_600_000_000, false);
        sub.convert_sync_timestamp_to_height(3000);
        assert_eq!(sub.sync_start_height(), 3000);
        assert_eq!(sub.sync_start_timestamp(), 0);

        sub.convert_sync_timestamp_to_height(9000);
        assert_eq!(sub.sync_start_height(), 3000);
    }
}
