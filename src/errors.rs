//! Error types for the wallet synchronisation engine
//!
//! Errors are split by who has to deal with them:
//!
//! - [`WalletError`]: typed, user-surfaced results returned by wallet operations
//!   (transfers, balance queries, subwallet management, wallet files). These are
//!   never raised across the sync loop.
//! - [`DaemonError`]: recoverable failures talking to the remote node. The sync
//!   engine logs them and retries after a backoff.
//! - [`SyncError`]: engine-level failures, including the fatal cursor gap.
//! - [`CryptoError`]: malformed keys, points or hex encodings.

use thiserror::Error;

/// Result alias for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

/// Result alias for synchronisation engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result alias for daemon calls
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result alias for cryptographic helpers
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the key and point helpers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid public key: not a valid curve point")]
    InvalidPublicKey,

    #[error("Invalid secret key: not a canonical scalar")]
    InvalidSecretKey,

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Failures talking to the remote node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    #[error("Daemon connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Daemon returned HTTP error: {0}")]
    HttpStatus(String),

    #[error("Daemon returned status '{0}'")]
    BadStatus(String),

    #[error("Malformed daemon response: {0}")]
    MalformedResponse(String),

    #[error("Daemon request timed out")]
    Timeout,
}

impl DaemonError {
    pub fn connection_failed(message: &str) -> Self {
        Self::ConnectionFailed(message.to_string())
    }

    pub fn malformed(message: &str) -> Self {
        Self::MalformedResponse(message.to_string())
    }

    /// Whether retrying the same request later can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedResponse(_))
    }
}

/// User-surfaced wallet errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    // Balance
    #[error("Not enough balance: required {required}, total balance {available}")]
    NotEnoughBalance { required: u64, available: u64 },

    #[error(
        "Not enough unlocked balance: required {required}, unlocked {unlocked} (total {total}). \
         Wait for incoming funds to unlock"
    )]
    NotEnoughUnlockedBalance {
        required: u64,
        unlocked: u64,
        total: u64,
    },

    // Addresses
    #[error("Address is the wrong length")]
    AddressWrongLength,

    #[error("Address does not have the expected prefix")]
    AddressWrongPrefix,

    #[error("Address is not valid base58")]
    AddressNotBase58,

    #[error("Address checksum or keys are invalid")]
    AddressNotValid,

    #[error("Integrated addresses are not allowed here")]
    IntegratedAddressNotAllowed,

    #[error("Address {0} does not belong to this wallet")]
    AddressNotInWallet(String),

    // Payment IDs
    #[error("Payment ID must be 64 hex characters")]
    PaymentIdWrongLength,

    #[error("Payment ID is not valid hex")]
    PaymentIdInvalid,

    #[error("Integrated addresses with different payment IDs, or a payment ID alongside an integrated address, were given")]
    ConflictingPaymentIds,

    // Transfer parameters
    #[error("Mixin {mixin} is below the minimum of {min}")]
    MixinTooSmall { mixin: u64, min: u64 },

    #[error("Mixin {mixin} is above the maximum of {max}")]
    MixinTooBig { mixin: u64, max: u64 },

    #[error("Fee {fee} is below the minimum of {min}")]
    FeeTooSmall { fee: u64, min: u64 },

    #[error("No destinations given")]
    NoDestinationsGiven,

    #[error("Transfer amount must be non-zero")]
    AmountIsZero,

    #[error("Amounts overflow a 64 bit integer")]
    WillOverflow,

    #[error("No transaction signer is configured")]
    SignerUnavailable,

    // Subwallets
    #[error("A subwallet with this spend key already exists")]
    SubWalletAlreadyExists,

    #[error("The primary address cannot be deleted")]
    CannotDeletePrimaryAddress,

    #[error("Operation is not permitted on a view-only wallet")]
    IllegalViewWalletOperation,

    #[error("Operation is only permitted on a view-only wallet")]
    IllegalNonViewWalletOperation,

    #[error("Transaction {0} is already recorded")]
    DuplicateTransaction(String),

    #[error("Transaction {0} was rejected by the daemon")]
    TransactionRejected(String),

    // Wallet file
    #[error("File is not a wallet file")]
    NotAWalletFile,

    #[error("Wrong password for wallet file")]
    WrongPassword,

    #[error("Wallet file format version {found} is not supported (max {supported})")]
    UnsupportedWalletFileFormatVersion { found: u16, supported: u16 },

    #[error("Wallet file is corrupted: {0}")]
    WalletFileCorrupted(String),

    // Plumbing
    #[error("Daemon is offline or unreachable")]
    DaemonOffline,

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Engine-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The source reported non-contiguous block heights as new blocks.
    /// Either it is malicious or badly broken, so the run is terminated.
    #[error("Blocks were missed in sync process: expected height {expected}, received {received}. Possible malicious source")]
    BlocksMissed { expected: u64, received: u64 },

    #[error("Synchroniser is already running")]
    AlreadyRunning,

    #[error("Failed to spawn {stage} thread: {message}")]
    ThreadSpawn { stage: &'static str, message: String },

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SyncError {
    /// Fatal errors end the synchronisation run instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BlocksMissed { .. })
    }
}
