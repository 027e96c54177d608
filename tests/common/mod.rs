//! Shared helpers for the integration tests
//!
//! Wallets here are restored from fresh keys so they scan the mock chain
//! from a fixed height, with fast engine timings and a capturing listener.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lightweight_wallet_sync::crypto::generate_keys;
use lightweight_wallet_sync::data_structures::{Address, Hash};
use lightweight_wallet_sync::events::listeners::mock_listener::CapturedEvents;
use lightweight_wallet_sync::events::listeners::MockEventListener;
use lightweight_wallet_sync::events::WalletEvent;
use lightweight_wallet_sync::scanning::mocks::mock_transaction_hash;
use lightweight_wallet_sync::scanning::{DaemonProxy, MockDaemon};
use lightweight_wallet_sync::wallet::{
    KdfParams, PreparedTransfer, SignedTransaction, TransactionSigner,
};
use lightweight_wallet_sync::{SyncConfig, WalletBackend, WalletResult};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Signer producing predictable hashes: the n-th transaction signed is
/// `mock_transaction_hash(SIGNED_HASH_BASE + n)`, starting at 1.
#[derive(Debug, Default)]
pub struct MockSigner {
    signed: AtomicU64,
}

pub const SIGNED_HASH_BASE: u64 = 9_000;

impl MockSigner {
    pub fn next_hash(&self) -> Hash {
        mock_transaction_hash(SIGNED_HASH_BASE + self.signed.load(Ordering::SeqCst) + 1)
    }
}

impl TransactionSigner for MockSigner {
    fn sign(
        &self,
        prepared: &PreparedTransfer,
        _daemon: &dyn DaemonProxy,
    ) -> WalletResult<SignedTransaction> {
        let n = self.signed.fetch_add(1, Ordering::SeqCst) + 1;
        let (_, transaction_private_key) = generate_keys();
        let change_outputs = if prepared.change_amount > 0 {
            vec![(generate_keys().0, prepared.change_amount)]
        } else {
            Vec::new()
        };

        Ok(SignedTransaction {
            hash: mock_transaction_hash(SIGNED_HASH_BASE + n),
            raw_transaction: format!("signed-{n}-{}-inputs", prepared.inputs.len()),
            transaction_private_key: Some(transaction_private_key),
            change_outputs,
        })
    }
}

pub struct TestWallet {
    pub wallet: WalletBackend,
    pub events: CapturedEvents,
    pub signer: Arc<MockSigner>,
}

impl TestWallet {
    pub fn address(&self) -> Address {
        Address::decode(
            &self.wallet.primary_address(),
            SyncConfig::default().network.address_prefix,
        )
        .unwrap()
    }

    pub fn synced_events(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, WalletEvent::Synced { .. }))
            .count()
    }

    pub fn transaction_events(&self) -> Vec<WalletEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, WalletEvent::Transaction(_)))
            .cloned()
            .collect()
    }

    /// Block until the wallet has processed `height`
    pub fn wait_for_height(&self, height: u64) -> bool {
        wait_until(TIMEOUT, || self.wallet.sync_heights().wallet_height >= height)
    }
}

/// Wallet restored from new keys, scanning `daemon` from `scan_height`
pub fn restored_wallet(daemon: &MockDaemon, scan_height: u64) -> TestWallet {
    let (_, spend) = generate_keys();
    let (_, view) = generate_keys();
    let listener = MockEventListener::new();
    let events = listener.captured();
    let signer = Arc::new(MockSigner::default());

    let wallet = WalletBackend::builder()
        .with_daemon(Arc::new(daemon.clone()))
        .with_config(SyncConfig::for_testing())
        .with_kdf(KdfParams::insecure_fast())
        .with_signer(signer.clone())
        .with_event_listener(Box::new(listener))
        .from_keys(spend, view, scan_height)
        .build()
        .unwrap();

    TestWallet {
        wallet,
        events,
        signer,
    }
}

pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Address nobody in the test owns
pub fn foreign_address() -> String {
    Address::new(generate_keys().0, generate_keys().0)
        .encode(SyncConfig::default().network.address_prefix)
}
