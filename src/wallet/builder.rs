//! Fluent construction of a [`WalletBackend`]
//!
//! The builder collects the daemon, the way the wallet is created, the engine
//! configuration and any event listeners, then assembles the backend in
//! [`WalletBackendBuilder::build`]. Nothing starts syncing until
//! [`WalletBackend::start`] is called.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::backend::WalletBackend;
use super::sub_wallets::SubWallets;
use super::transfer::TransactionSigner;
use super::wallet_file::{open_wallet_file, KdfParams, WalletState};
use crate::config::SyncConfig;
use crate::crypto::{generate_keys, view_keys_from_spend_key};
use crate::data_structures::SecretKey;
use crate::errors::{CryptoError, WalletError};
use crate::events::{EventDispatcher, EventDispatcherError, EventListener};
use crate::scanning::{DaemonProxy, SyncStatus};

/// Errors that can occur while building a backend
#[derive(Debug, Error)]
pub enum WalletBuildError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Event listener error: {0}")]
    EventListener(#[from] EventDispatcherError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// How the wallet keys and state come into being
enum WalletCreationMethod {
    /// Fresh random keys, syncing from the current time
    GenerateNew,
    FromKeys {
        private_spend_key: SecretKey,
        private_view_key: SecretKey,
        scan_height: u64,
    },
    ViewOnly {
        private_view_key: SecretKey,
        address: String,
        scan_height: u64,
    },
    FromFile {
        path: PathBuf,
        password: String,
    },
    FromState(Box<WalletState>),
}

impl fmt::Debug for WalletCreationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateNew => write!(f, "GenerateNew"),
            Self::FromKeys { scan_height, .. } => write!(f, "FromKeys(scan_height={scan_height})"),
            Self::ViewOnly {
                address,
                scan_height,
                ..
            } => write!(f, "ViewOnly({address}, scan_height={scan_height})"),
            Self::FromFile { path, .. } => write!(f, "FromFile({})", path.display()),
            Self::FromState(_) => write!(f, "FromState"),
        }
    }
}

/// Builder for [`WalletBackend`]
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lightweight_wallet_sync::events::listeners::LoggingListener;
/// use lightweight_wallet_sync::scanning::MockDaemon;
/// use lightweight_wallet_sync::wallet::WalletBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let wallet = WalletBackend::builder()
///     .with_daemon(Arc::new(MockDaemon::with_chain(0, 100)))
///     .generate_new()
///     .with_event_listener(Box::new(LoggingListener::new()))
///     .build()?;
/// wallet.start()?;
/// # Ok(())
/// # }
/// ```
pub struct WalletBackendBuilder {
    daemon: Option<Arc<dyn DaemonProxy>>,
    creation_method: Option<WalletCreationMethod>,
    config: SyncConfig,
    kdf: KdfParams,
    signer: Option<Arc<dyn TransactionSigner>>,
    listeners_to_register: Vec<Box<dyn EventListener>>,
}

impl fmt::Debug for WalletBackendBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletBackendBuilder")
            .field("creation_method", &self.creation_method)
            .field("config", &self.config)
            .field("has_daemon", &self.daemon.is_some())
            .field("has_signer", &self.signer.is_some())
            .field("listeners", &self.listeners_to_register.len())
            .finish()
    }
}

impl Default for WalletBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletBackendBuilder {
    pub fn new() -> Self {
        Self {
            daemon: None,
            creation_method: None,
            config: SyncConfig::default(),
            kdf: KdfParams::default(),
            signer: None,
            listeners_to_register: Vec::new(),
        }
    }

    pub fn with_daemon(mut self, daemon: Arc<dyn DaemonProxy>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    pub fn generate_new(mut self) -> Self {
        self.creation_method = Some(WalletCreationMethod::GenerateNew);
        self
    }

    /// Restore from a spend and view key pair, scanning from `scan_height`
    pub fn from_keys(
        mut self,
        private_spend_key: SecretKey,
        private_view_key: SecretKey,
        scan_height: u64,
    ) -> Self {
        self.creation_method = Some(WalletCreationMethod::FromKeys {
            private_spend_key,
            private_view_key,
            scan_height,
        });
        self
    }

    /// Watch `address` with its private view key. Incoming funds are seen;
    /// spends are not.
    pub fn view_only(mut self, private_view_key: SecretKey, address: &str, scan_height: u64) -> Self {
        self.creation_method = Some(WalletCreationMethod::ViewOnly {
            private_view_key,
            address: address.to_string(),
            scan_height,
        });
        self
    }

    pub fn from_file(mut self, path: impl Into<PathBuf>, password: &str) -> Self {
        self.creation_method = Some(WalletCreationMethod::FromFile {
            path: path.into(),
            password: password.to_string(),
        });
        self
    }

    pub fn from_state(mut self, state: WalletState) -> Self {
        self.creation_method = Some(WalletCreationMethod::FromState(Box::new(state)));
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Password hashing cost used when saving
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Needed for sending; a wallet without a signer can still sync
    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_event_listener(mut self, listener: Box<dyn EventListener>) -> Self {
        self.listeners_to_register.push(listener);
        self
    }

    pub fn build(self) -> Result<WalletBackend, WalletBuildError> {
        let daemon = self
            .daemon
            .ok_or(WalletBuildError::MissingParameter("daemon"))?;
        let method = self
            .creation_method
            .ok_or(WalletBuildError::MissingParameter("creation method"))?;
        self.config.validate()?;

        let network = self.config.network.clone();
        let fresh_cursor = || {
            SyncStatus::with_limits(
                self.config.recent_hashes_capacity,
                self.config.checkpoint_interval,
            )
        };

        let (sub_wallets, sync_status) = match method {
            WalletCreationMethod::GenerateNew => {
                let (_, private_spend_key) = generate_keys();
                let (_, private_view_key) = view_keys_from_spend_key(&private_spend_key)?;
                let wallets = SubWallets::new(private_spend_key, private_view_key, 0, true, network)?;
                (wallets, fresh_cursor())
            }
            WalletCreationMethod::FromKeys {
                private_spend_key,
                private_view_key,
                scan_height,
            } => {
                let wallets =
                    SubWallets::new(private_spend_key, private_view_key, scan_height, false, network)?;
                (wallets, fresh_cursor())
            }
            WalletCreationMethod::ViewOnly {
                private_view_key,
                address,
                scan_height,
            } => {
                let wallets = SubWallets::new_view_wallet(
                    private_view_key,
                    &address,
                    scan_height,
                    false,
                    network,
                )?;
                (wallets, fresh_cursor())
            }
            WalletCreationMethod::FromFile { path, password } => {
                let state = open_wallet_file(&path, &password)?;
                (SubWallets::from_state(state.sub_wallets, network), state.sync_status)
            }
            WalletCreationMethod::FromState(state) => {
                let state = *state;
                (SubWallets::from_state(state.sub_wallets, network), state.sync_status)
            }
        };

        let dispatcher = EventDispatcher::new()?;
        for listener in self.listeners_to_register {
            dispatcher.register(listener)?;
        }

        Ok(WalletBackend::assemble(
            daemon,
            Arc::new(sub_wallets),
            sync_status,
            dispatcher,
            self.signer,
            self.config,
            self.kdf,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::secret_key_to_public_key;
    use crate::data_structures::Address;
    use crate::events::listeners::MockEventListener;
    use crate::scanning::MockDaemon;

    fn daemon() -> Arc<dyn DaemonProxy> {
        Arc::new(MockDaemon::with_chain(0, 10))
    }

    #[test]
    fn test_missing_parameters() {
        let result = WalletBackendBuilder::new().generate_new().build();
        assert!(matches!(result, Err(WalletBuildError::MissingParameter("daemon"))));

        let result = WalletBackendBuilder::new().with_daemon(daemon()).build();
        assert!(matches!(
            result,
            Err(WalletBuildError::MissingParameter("creation method"))
        ));
    }

    #[test]
    fn test_generate_new() {
        let wallet = WalletBackendBuilder::new()
            .with_daemon(daemon())
            .generate_new()
            .build()
            .unwrap();
        assert_eq!(wallet.wallet_count(), 1);
        assert!(!wallet.is_view_wallet());
        assert_eq!(wallet.sync_heights().wallet_height, 0);
    }

    #[test]
    fn test_from_keys_keeps_address() {
        let (_, spend) = generate_keys();
        let (view_public, view) = generate_keys();
        let spend_public = secret_key_to_public_key(&spend).unwrap();
        let config = SyncConfig::for_testing();
        let expected =
            Address::new(spend_public, view_public).encode(config.network.address_prefix);

        let wallet = WalletBackendBuilder::new()
            .with_daemon(daemon())
            .with_config(config)
            .from_keys(spend, view, 5)
            .build()
            .unwrap();
        assert_eq!(wallet.primary_address(), expected);
    }

    #[test]
    fn test_view_only() {
        let (spend_public, _) = generate_keys();
        let (view_public, view) = generate_keys();
        let address = Address::new(spend_public, view_public)
            .encode(SyncConfig::default().network.address_prefix);

        let wallet = WalletBackendBuilder::new()
            .with_daemon(daemon())
            .view_only(view, &address, 0)
            .build()
            .unwrap();
        assert!(wallet.is_view_wallet());
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let result = WalletBackendBuilder::new()
            .with_daemon(daemon())
            .generate_new()
            .with_event_listener(Box::new(MockEventListener::new()))
            .with_event_listener(Box::new(MockEventListener::new()))
            .build();
        assert!(matches!(
            result,
            Err(WalletBuildError::EventListener(EventDispatcherError::DuplicateListener(_)))
        ));
    }
}
