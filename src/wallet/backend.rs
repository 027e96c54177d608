//! The wallet as a whole: state, engine, daemon status and events
//!
//! [`WalletBackend`] ties the pieces together for an application. It owns
//! the subwallet container, the [`WalletSynchronizer`] that keeps it current,
//! the daemon status poller and the event dispatcher, and offers the
//! operations a UI needs: balances, addresses, subwallet management, sending
//! and saving.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::builder::WalletBackendBuilder;
use super::sub_wallets::SubWallets;
use super::transfer::{
    prepare_transfer, relay_transaction, store_sent_transaction, TransactionSigner,
    TransferRequest,
};
use super::wallet_file::{save_wallet_file, KdfParams, WalletState};
use crate::config::SyncConfig;
use crate::data_structures::{Hash, PublicKey, SecretKey, Transaction};
use crate::errors::{SyncError, SyncResult, WalletError, WalletResult};
use crate::events::{DispatchStats, EventDispatcher, EventDispatcherError, EventListener};
use crate::scanning::{
    DaemonInfo, DaemonProxy, DaemonStatus, DaemonStatusPoller, SyncStatus, WalletSynchronizer,
};

/// Where the wallet and the daemon are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHeights {
    /// Last block applied to the wallet
    pub wallet_height: u64,
    /// Top block the daemon has
    pub local_daemon_height: u64,
    /// Top block the daemon's peers report
    pub network_height: u64,
}

pub struct WalletBackend {
    sub_wallets: Arc<SubWallets>,
    synchronizer: WalletSynchronizer,
    daemon_status: Arc<DaemonStatus>,
    poller: Mutex<Option<DaemonStatusPoller>>,
    dispatcher: Mutex<EventDispatcher>,
    signer: Option<Arc<dyn TransactionSigner>>,
    config: SyncConfig,
    kdf: KdfParams,
}

impl std::fmt::Debug for WalletBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletBackend")
            .field("sub_wallets", &self.sub_wallets)
            .field("synchronizer", &self.synchronizer)
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

impl WalletBackend {
    pub fn builder() -> WalletBackendBuilder {
        WalletBackendBuilder::new()
    }

    pub(crate) fn assemble(
        daemon: Arc<dyn DaemonProxy>,
        sub_wallets: Arc<SubWallets>,
        sync_status: SyncStatus,
        dispatcher: EventDispatcher,
        signer: Option<Arc<dyn TransactionSigner>>,
        config: SyncConfig,
        kdf: KdfParams,
    ) -> Self {
        let daemon_status = Arc::new(DaemonStatus::new());
        let synchronizer = WalletSynchronizer::new(
            daemon,
            Arc::clone(&sub_wallets),
            sync_status,
            Arc::clone(&daemon_status),
            dispatcher.emitter(),
            config.clone(),
        );

        Self {
            sub_wallets,
            synchronizer,
            daemon_status,
            poller: Mutex::new(None),
            dispatcher: Mutex::new(dispatcher),
            signer,
            config,
            kdf,
        }
    }

    // Lifecycle

    /// Start the daemon status poller and the synchronisation threads
    pub fn start(&self) -> SyncResult<()> {
        let mut poller = self.poller.lock();
        if poller.is_none() {
            *poller = Some(DaemonStatusPoller::spawn(
                self.synchronizer.daemon(),
                Arc::clone(&self.daemon_status),
                self.config.daemon_poll_interval(),
            )?);
        }
        drop(poller);

        self.synchronizer.start()
    }

    pub fn stop(&self) {
        self.synchronizer.stop();
        if let Some(mut poller) = self.poller.lock().take() {
            poller.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.synchronizer.is_running()
    }

    /// The error that ended the last sync run, if it ended on its own
    pub fn take_sync_error(&self) -> Option<SyncError> {
        self.synchronizer.take_fatal_error()
    }

    /// Use another daemon from now on
    pub fn swap_daemon(&self, daemon: Arc<dyn DaemonProxy>) -> SyncResult<()> {
        let was_polling = self.poller.lock().take().map(|mut poller| poller.stop()).is_some();
        self.synchronizer.swap_daemon(daemon)?;
        if was_polling {
            *self.poller.lock() = Some(DaemonStatusPoller::spawn(
                self.synchronizer.daemon(),
                Arc::clone(&self.daemon_status),
                self.config.daemon_poll_interval(),
            )?);
        }
        Ok(())
    }

    /// Forget everything from `scan_height` up and scan it again
    pub fn reset(&self, scan_height: u64) -> SyncResult<()> {
        self.synchronizer.reset(scan_height)
    }

    // Persistence

    /// Cursor and wallet state as they would be saved
    pub fn wallet_state(&self) -> WalletState {
        let (sync_status, sub_wallets) = self.synchronizer.consistent_snapshot();
        WalletState {
            sync_status,
            sub_wallets,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>, password: &str) -> WalletResult<()> {
        save_wallet_file(path, &self.wallet_state(), password, self.kdf)
    }

    // Status

    pub fn sync_heights(&self) -> SyncHeights {
        let info = self.daemon_status.info();
        SyncHeights {
            wallet_height: self.synchronizer.current_scan_height(),
            local_daemon_height: info.local_height,
            network_height: info.network_height,
        }
    }

    pub fn daemon_info(&self) -> DaemonInfo {
        self.daemon_status.info()
    }

    pub fn is_daemon_online(&self) -> bool {
        self.daemon_status.is_online()
    }

    /// Height used for unlock checks: the best we know of the chain tip
    fn chain_height(&self) -> u64 {
        self.daemon_status
            .network_height()
            .max(self.synchronizer.current_scan_height())
    }

    // Events

    pub fn register_listener(&self, listener: Box<dyn EventListener>) -> Result<(), EventDispatcherError> {
        self.dispatcher.lock().register(listener)
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        self.dispatcher.lock().remove(name)
    }

    pub fn event_stats(&self) -> DispatchStats {
        self.dispatcher.lock().stats()
    }

    // Addresses and keys

    pub fn primary_address(&self) -> String {
        self.sub_wallets.primary_address()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sub_wallets.addresses()
    }

    pub fn wallet_count(&self) -> usize {
        self.sub_wallets.wallet_count()
    }

    pub fn is_view_wallet(&self) -> bool {
        self.sub_wallets.is_view_wallet()
    }

    pub fn private_view_key(&self) -> SecretKey {
        self.sub_wallets.private_view_key()
    }

    /// `(public, private)` spend keys of one of our addresses
    pub fn spend_keys(&self, address: &str) -> WalletResult<(PublicKey, SecretKey)> {
        let public = self.sub_wallets.public_spend_key_for(address)?;
        let private = self.sub_wallets.private_spend_key(&public)?;
        Ok((public, private))
    }

    /// Add a freshly generated address
    pub fn add_sub_wallet(&self) -> WalletResult<String> {
        let (address, _) = self.sub_wallets.add_sub_wallet()?;
        Ok(address)
    }

    /// Import a spend key. Blocks below our height are rescanned when the
    /// key existed before them.
    pub fn import_sub_wallet(&self, private_spend_key: SecretKey, scan_height: u64) -> WalletResult<String> {
        let address = self.sub_wallets.import_sub_wallet(private_spend_key, scan_height)?;
        self.rescan_for_import(scan_height)?;
        Ok(address)
    }

    pub fn import_view_sub_wallet(&self, public_spend_key: PublicKey, scan_height: u64) -> WalletResult<String> {
        let address = self
            .sub_wallets
            .import_view_sub_wallet(public_spend_key, scan_height)?;
        self.rescan_for_import(scan_height)?;
        Ok(address)
    }

    fn rescan_for_import(&self, scan_height: u64) -> WalletResult<()> {
        if scan_height >= self.synchronizer.current_scan_height() {
            return Ok(());
        }
        info!(scan_height, "Imported key predates wallet height, rescanning");
        self.synchronizer.reset(scan_height).map_err(|e| match e {
            SyncError::Wallet(e) => e,
            other => WalletError::Io(other.to_string()),
        })
    }

    pub fn delete_sub_wallet(&self, address: &str) -> WalletResult<()> {
        self.sub_wallets.delete_sub_wallet(address)
    }

    // Balances and history

    /// `(unlocked, locked)` over every address
    pub fn balance(&self) -> WalletResult<(u64, u64)> {
        self.sub_wallets.get_balance(&[], true, self.chain_height())
    }

    pub fn balance_for(&self, address: &str) -> WalletResult<(u64, u64)> {
        let key = self.sub_wallets.public_spend_key_for(address)?;
        self.sub_wallets.get_balance(&[key], false, self.chain_height())
    }

    /// `(address, unlocked, locked)` per address
    pub fn balances(&self) -> Vec<(String, u64, u64)> {
        self.sub_wallets.get_balances(self.chain_height())
    }

    /// Change from our own sends that is not confirmed yet
    pub fn unconfirmed_incoming_balance(&self) -> u64 {
        self.sub_wallets.unconfirmed_incoming_balance()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.sub_wallets.transactions()
    }

    pub fn unconfirmed_transactions(&self) -> Vec<Transaction> {
        self.sub_wallets.unconfirmed_transactions()
    }

    pub fn tx_private_key(&self, hash: &Hash) -> Option<SecretKey> {
        self.sub_wallets.tx_private_key(hash)
    }

    // Sending

    /// Validate, sign, relay and record a transfer, returning its hash
    pub fn send_transaction(&self, request: &TransferRequest) -> WalletResult<Hash> {
        let signer = self.signer.as_ref().ok_or(WalletError::SignerUnavailable)?;
        let daemon = self.synchronizer.daemon();

        let prepared = prepare_transfer(
            request,
            &self.daemon_status.node_fee(),
            &self.sub_wallets,
            daemon.as_ref(),
            self.chain_height(),
            self.config.global_indexes_obscurity,
        )?;
        let signed = signer.sign(&prepared, daemon.as_ref())?;
        debug!(hash = %signed.hash, "Signed transaction");

        relay_transaction(daemon.as_ref(), &signed)?;
        store_sent_transaction(&self.sub_wallets, &prepared, &signed)?;
        Ok(signed.hash)
    }

    /// Single destination with the default mixin and minimum fee
    pub fn send_transaction_basic(&self, destination: &str, amount: u64, payment_id: &str) -> WalletResult<Hash> {
        let request = TransferRequest::basic(destination, amount, &self.config.network)
            .with_payment_id(payment_id);
        self.send_transaction(&request)
    }
}

impl Drop for WalletBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
