//! Sending from a synced wallet and tracking the unconfirmed send

mod common;

use std::sync::Arc;

use common::{foreign_address, restored_wallet, wait_until, TestWallet, TIMEOUT};
use lightweight_wallet_sync::data_structures::Hash;
use lightweight_wallet_sync::scanning::mocks::{mock_payment, MockDaemon, MockNetworkFailureModes};
use lightweight_wallet_sync::scanning::NodeFee;
use lightweight_wallet_sync::{SyncConfig, TransferRequest, WalletBackend, WalletError};

/// Wallet synced to height 30 holding one output of `amount` from block 10
fn funded_wallet(daemon: &MockDaemon, amount: u64) -> TestWallet {
    let test = restored_wallet(daemon, 1);
    let address = test.address();
    daemon.add_transaction(
        10,
        mock_payment(Hash::from_bytes([10; 32]), &[(&address, amount)], 0, Vec::new()),
    );
    test.wallet.start().unwrap();
    assert!(test.wait_for_height(30));
    assert!(wait_until(TIMEOUT, || test.wallet.balance().unwrap() == (amount, 0)));
    test
}

#[test]
fn test_send_locks_inputs_until_cancelled() {
    let daemon = MockDaemon::with_chain(1, 30);
    let test = funded_wallet(&daemon, 1_000);

    // Keep the send in the pool so the engine leaves it alone for now
    let expected_hash = test.signer.next_hash();
    daemon.add_to_pool(expected_hash);

    let hash = test
        .wallet
        .send_transaction_basic(&foreign_address(), 300, "")
        .unwrap();
    assert_eq!(hash, expected_hash);
    assert_eq!(daemon.sent_transactions(), vec!["signed-1-1-inputs".to_string()]);

    let unconfirmed = test.wallet.unconfirmed_transactions();
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(unconfirmed[0].hash, hash);
    assert_eq!(unconfirmed[0].fee, 10);
    assert_eq!(unconfirmed[0].total_amount(), -310);
    assert!(test.wallet.tx_private_key(&hash).is_some());

    assert_eq!(test.wallet.balance().unwrap(), (0, 0));
    assert_eq!(test.wallet.unconfirmed_incoming_balance(), 690);

    // The daemon drops it; the engine notices on its next idle pass
    daemon.remove_from_pool(&hash);
    assert!(wait_until(TIMEOUT, || test.wallet.unconfirmed_transactions().is_empty()));
    assert_eq!(test.wallet.balance().unwrap(), (1_000, 0));
    assert_eq!(test.wallet.unconfirmed_incoming_balance(), 0);
}

#[test]
fn test_send_validation_errors() {
    let daemon = MockDaemon::with_chain(1, 30);
    let test = funded_wallet(&daemon, 100);

    assert_eq!(
        test.wallet.send_transaction_basic(&foreign_address(), 0, ""),
        Err(WalletError::AmountIsZero)
    );
    assert_eq!(
        test.wallet.send_transaction_basic("not an address", 10, ""),
        Err(WalletError::AddressNotBase58)
    );
    assert_eq!(
        test.wallet.send_transaction_basic(&foreign_address(), 10, "abc"),
        Err(WalletError::PaymentIdWrongLength)
    );
    assert_eq!(
        test.wallet.send_transaction_basic(&foreign_address(), 95, ""),
        Err(WalletError::NotEnoughBalance {
            required: 105,
            available: 100
        })
    );

    let request = TransferRequest::basic(&foreign_address(), 10, &SyncConfig::default().network)
        .with_mixin(50);
    assert!(matches!(
        test.wallet.send_transaction(&request),
        Err(WalletError::MixinTooBig { mixin: 50, .. })
    ));
    assert!(daemon.sent_transactions().is_empty());
    assert_eq!(test.wallet.balance().unwrap(), (100, 0));
}

#[test]
fn test_node_fee_is_charged() {
    let daemon = MockDaemon::with_chain(1, 30);
    let test = funded_wallet(&daemon, 1_000);
    daemon.set_node_fee(NodeFee {
        amount: 50,
        address: foreign_address(),
    });
    // Let a full status refresh pick up the fee
    let before = daemon.info_requests();
    assert!(wait_until(TIMEOUT, || daemon.info_requests() >= before + 2));

    let expected_hash = test.signer.next_hash();
    daemon.add_to_pool(expected_hash);
    test.wallet
        .send_transaction_basic(&foreign_address(), 100, "")
        .unwrap();

    let unconfirmed = test.wallet.unconfirmed_transactions();
    assert_eq!(unconfirmed[0].total_amount(), -160);
    assert_eq!(test.wallet.unconfirmed_incoming_balance(), 840);
}

#[test]
fn test_relay_failures_leave_wallet_untouched() {
    let daemon = MockDaemon::with_chain(1, 30);
    let test = funded_wallet(&daemon, 500);

    daemon.set_failure_modes(MockNetworkFailureModes {
        reject_send: true,
        ..Default::default()
    });
    let rejected = test.wallet.send_transaction_basic(&foreign_address(), 100, "");
    assert!(matches!(rejected, Err(WalletError::TransactionRejected(_))));

    daemon.set_failure_modes(MockNetworkFailureModes {
        fail_send: true,
        ..Default::default()
    });
    assert_eq!(
        test.wallet.send_transaction_basic(&foreign_address(), 100, ""),
        Err(WalletError::DaemonOffline)
    );

    assert!(test.wallet.unconfirmed_transactions().is_empty());
    assert_eq!(test.wallet.balance().unwrap(), (500, 0));
}

#[test]
fn test_wallet_without_signer_cannot_send() {
    let daemon = MockDaemon::with_chain(1, 5);
    let wallet = WalletBackend::builder()
        .with_daemon(Arc::new(daemon))
        .with_config(SyncConfig::for_testing())
        .generate_new()
        .build()
        .unwrap();

    assert_eq!(
        wallet.send_transaction_basic(&foreign_address(), 1, ""),
        Err(WalletError::SignerUnavailable)
    );
}
