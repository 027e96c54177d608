//! Wallet address encoding
//!
//! An address is base58 over `varint(prefix) || [payment id] || spend key ||
//! view key || checksum`, where the checksum is the first four bytes of the
//! Blake2b-512 hash of everything before it. Integrated addresses embed a
//! 32 byte payment id between the prefix and the keys.

use std::fmt;

use blake2::{Blake2b512, Digest};

use super::types::PublicKey;
use crate::crypto::{check_key, encode_varint};
use crate::errors::{WalletError, WalletResult};

const CHECKSUM_SIZE: usize = 4;
const KEYS_SIZE: usize = 64;
const PAYMENT_ID_SIZE: usize = 32;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub public_spend_key: PublicKey,
    pub public_view_key: PublicKey,
    /// 64 hex characters, present only for integrated addresses
    pub payment_id: Option<String>,
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Blake2b512::digest(body);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

impl Address {
    pub fn new(public_spend_key: PublicKey, public_view_key: PublicKey) -> Self {
        Self {
            public_spend_key,
            public_view_key,
            payment_id: None,
        }
    }

    pub fn integrated(
        public_spend_key: PublicKey,
        public_view_key: PublicKey,
        payment_id: &str,
    ) -> WalletResult<Self> {
        validate_payment_id(payment_id)?;
        Ok(Self {
            public_spend_key,
            public_view_key,
            payment_id: Some(payment_id.to_lowercase()),
        })
    }

    pub fn is_integrated(&self) -> bool {
        self.payment_id.is_some()
    }

    /// Same keys with the payment id stripped
    pub fn standard(&self) -> Self {
        Self::new(self.public_spend_key, self.public_view_key)
    }

    pub fn encode(&self, prefix: u64) -> String {
        let mut body = Vec::with_capacity(10 + PAYMENT_ID_SIZE + KEYS_SIZE + CHECKSUM_SIZE);
        encode_varint(prefix, &mut body);
        if let Some(payment_id) = &self.payment_id {
            // Validated on construction
            body.extend_from_slice(&hex::decode(payment_id).unwrap_or_default());
        }
        body.extend_from_slice(self.public_spend_key.as_bytes());
        body.extend_from_slice(self.public_view_key.as_bytes());
        let check = checksum(&body);
        body.extend_from_slice(&check);
        bs58::encode(body).into_string()
    }

    /// Parse and fully validate an address string
    pub fn decode(address: &str, prefix: u64) -> WalletResult<Self> {
        let bytes = bs58::decode(address)
            .into_vec()
            .map_err(|_| WalletError::AddressNotBase58)?;

        let (found_prefix, prefix_len) =
            decode_varint(&bytes).ok_or(WalletError::AddressWrongLength)?;

        let rest_len = bytes.len() - prefix_len;
        let integrated = match rest_len {
            n if n == KEYS_SIZE + CHECKSUM_SIZE => false,
            n if n == PAYMENT_ID_SIZE + KEYS_SIZE + CHECKSUM_SIZE => true,
            _ => return Err(WalletError::AddressWrongLength),
        };

        if found_prefix != prefix {
            return Err(WalletError::AddressWrongPrefix);
        }

        let (body, check) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        if checksum(body) != check {
            return Err(WalletError::AddressNotValid);
        }

        let mut offset = prefix_len;
        let payment_id = if integrated {
            let id = hex::encode(&body[offset..offset + PAYMENT_ID_SIZE]);
            offset += PAYMENT_ID_SIZE;
            Some(id)
        } else {
            None
        };

        let mut spend = [0u8; 32];
        spend.copy_from_slice(&body[offset..offset + 32]);
        let mut view = [0u8; 32];
        view.copy_from_slice(&body[offset + 32..offset + 64]);

        let public_spend_key = PublicKey::from_bytes(spend);
        let public_view_key = PublicKey::from_bytes(view);
        if !check_key(&public_spend_key) || !check_key(&public_view_key) {
            return Err(WalletError::AddressNotValid);
        }

        Ok(Self {
            public_spend_key,
            public_view_key,
            payment_id,
        })
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("spend", &self.public_spend_key.to_hex())
            .field("view", &self.public_view_key.to_hex())
            .field("payment_id", &self.payment_id)
            .finish()
    }
}

/// A payment id is either empty or exactly 64 hex characters
pub fn validate_payment_id(payment_id: &str) -> WalletResult<()> {
    if payment_id.is_empty() {
        return Ok(());
    }
    if payment_id.len() != PAYMENT_ID_SIZE * 2 {
        return Err(WalletError::PaymentIdWrongLength);
    }
    if !payment_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WalletError::PaymentIdInvalid);
    }
    Ok(())
}
