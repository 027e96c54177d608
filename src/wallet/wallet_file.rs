//! Persisted wallet state and the encrypted wallet file
//!
//! The state is a single JSON document: the sync cursor fields sit at the top
//! level next to the subwallet container. On disk it is encrypted with
//! XChaCha20-Poly1305 under a key derived from the password with Argon2id.
//!
//! File layout:
//!
//! ```text
//! identifier | version (u16 LE) | argon2 m, t, p (u32 LE each) | salt (16) | nonce (24) | ciphertext
//! ```

use std::fs;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::sub_wallets::SubWalletsState;
use crate::errors::{WalletError, WalletResult};
use crate::scanning::SyncStatus;

/// Magic bytes at the start of every wallet file
pub const WALLET_FILE_IDENTIFIER: &[u8] = b"lightweight-wallet-sync\0";

/// Newest file format this build reads and the one it writes
pub const WALLET_FILE_FORMAT_VERSION: u16 = 1;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
const KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = WALLET_FILE_IDENTIFIER.len() + 2 + 12 + SALT_SIZE + NONCE_SIZE;

/// Everything needed to resume a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    #[serde(flatten)]
    pub sync_status: SyncStatus,
    #[serde(flatten)]
    pub sub_wallets: SubWalletsState,
}

impl WalletState {
    pub fn to_json(&self) -> WalletResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> WalletResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Argon2id cost parameters, stored in the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

fn derive_key(
    password: &str,
    salt: &[u8],
    kdf: KdfParams,
) -> WalletResult<Zeroizing<[u8; KEY_SIZE]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_SIZE))
        .map_err(|e| WalletError::WalletFileCorrupted(format!("Bad key derivation parameters: {e}")))?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| WalletError::WalletFileCorrupted(format!("Key derivation failed: {e}")))?;
    Ok(key)
}

/// Serialize and encrypt `state`
pub fn encrypt_wallet_state(
    state: &WalletState,
    password: &str,
    kdf: KdfParams,
) -> WalletResult<Vec<u8>> {
    let plaintext = Zeroizing::new(serde_json::to_vec(state)?);

    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(password, &salt, kdf)?;
    let key_bytes: &[u8; KEY_SIZE] = &key;
    let cipher = XChaCha20Poly1305::new(key_bytes.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| WalletError::WalletFileCorrupted(format!("Encryption failed: {e}")))?;

    let mut file = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    file.extend_from_slice(WALLET_FILE_IDENTIFIER);
    file.extend_from_slice(&WALLET_FILE_FORMAT_VERSION.to_le_bytes());
    file.extend_from_slice(&kdf.memory_kib.to_le_bytes());
    file.extend_from_slice(&kdf.iterations.to_le_bytes());
    file.extend_from_slice(&kdf.parallelism.to_le_bytes());
    file.extend_from_slice(&salt);
    file.extend_from_slice(&nonce);
    file.extend_from_slice(&ciphertext);
    Ok(file)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// Decrypt and parse a wallet file's contents
pub fn decrypt_wallet_state(bytes: &[u8], password: &str) -> WalletResult<WalletState> {
    if !bytes.starts_with(WALLET_FILE_IDENTIFIER) {
        return Err(WalletError::NotAWalletFile);
    }

    let mut offset = WALLET_FILE_IDENTIFIER.len();
    if bytes.len() < offset + 2 {
        return Err(WalletError::WalletFileCorrupted("Truncated header".to_string()));
    }
    let version = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    if version == 0 || version > WALLET_FILE_FORMAT_VERSION {
        return Err(WalletError::UnsupportedWalletFileFormatVersion {
            found: version,
            supported: WALLET_FILE_FORMAT_VERSION,
        });
    }
    offset += 2;

    if bytes.len() < HEADER_SIZE {
        return Err(WalletError::WalletFileCorrupted("Truncated header".to_string()));
    }
    let kdf = KdfParams {
        memory_kib: read_u32(bytes, offset),
        iterations: read_u32(bytes, offset + 4),
        parallelism: read_u32(bytes, offset + 8),
    };
    offset += 12;
    let salt = &bytes[offset..offset + SALT_SIZE];
    offset += SALT_SIZE;
    let nonce = &bytes[offset..offset + NONCE_SIZE];
    offset += NONCE_SIZE;

    let key = derive_key(password, salt, kdf)?;
    let key_bytes: &[u8; KEY_SIZE] = &key;
    let cipher = XChaCha20Poly1305::new(key_bytes.into());
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(nonce), &bytes[offset..])
            .map_err(|_| WalletError::WrongPassword)?,
    );

    serde_json::from_slice(&plaintext)
        .map_err(|e| WalletError::WalletFileCorrupted(e.to_string()))
}

/// Encrypt `state` to `path`, replacing any existing file atomically
pub fn save_wallet_file(
    path: impl AsRef<Path>,
    state: &WalletState,
    password: &str,
    kdf: KdfParams,
) -> WalletResult<()> {
    let path = path.as_ref();
    let contents = encrypt_wallet_state(state, password, kdf)?;

    let temporary = path.with_extension("tmp");
    fs::write(&temporary, contents)?;
    fs::rename(&temporary, path)?;

    debug!(path = %path.display(), height = state.sync_status.height(), "Saved wallet file");
    Ok(())
}

pub fn open_wallet_file(path: impl AsRef<Path>, password: &str) -> WalletResult<WalletState> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let state = decrypt_wallet_state(&bytes, password)?;

    info!(
        path = %path.display(),
        height = state.sync_status.height(),
        subwallets = state.sub_wallets.sub_wallets.len(),
        "Opened wallet file"
    );
    Ok(state)
}
