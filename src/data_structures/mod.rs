//! Data structures shared by the sync engine and the wallet state

pub mod address;
pub mod transaction;
pub mod types;
pub mod wallet_block;

pub use address::Address;
pub use transaction::{InputStatus, Transaction, TransactionInput};
pub use types::{Hash, KeyDerivation, KeyImage, PublicKey, SecretKey};
pub use wallet_block::{
    KeyInput, KeyOutput, RawCoinbaseTransaction, RawTransaction, ScannableTransaction,
    WalletBlock,
};
