//! Wallet state and the operations on it
//!
//! [`SubWallets`] holds every address of a wallet together with its inputs
//! and transaction history. [`WalletBackend`] wraps it with a sync engine,
//! daemon status and events, and is what applications normally use.

pub mod backend;
pub mod builder;
pub mod node_fee;
pub mod sub_wallet;
pub mod sub_wallets;
pub mod transfer;
pub mod unlock;
pub mod wallet_file;

pub use backend::{SyncHeights, WalletBackend};
pub use builder::{WalletBackendBuilder, WalletBuildError};
pub use sub_wallet::{SubWallet, UnconfirmedInput};
pub use sub_wallets::{
    OwnedOutput, ScannedTransaction, SpendableInput, SubWallets, SubWalletsState,
};
pub use transfer::{
    PreparedTransfer, SignedTransaction, TransactionDestination, TransactionSigner,
    TransferRequest,
};
pub use unlock::{is_unlocked, is_unlocked_at};
pub use wallet_file::{open_wallet_file, save_wallet_file, KdfParams, WalletState};
