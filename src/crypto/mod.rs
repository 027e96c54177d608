//! One-time key algebra for output ownership testing
//!
//! The wallet only needs a handful of primitives, all built on the Ristretto
//! group from `curve25519-dalek` with Blake2b-512 as the hash:
//!
//! - `D = a * R`: key derivation from the view secret `a` and transaction key `R`
//! - `P = Hs(D || i) * G + B`: one-time output key for output `i` and spend key `B`
//! - `B = P - Hs(D || i) * G`: recovering the spend key an output was sent to
//! - `x = Hs(D || i) + b`: one-time secret for spending
//! - `I = x * Hp(P)`: key image of an output
//!
//! These functions are pure and thread-safe.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;

use crate::data_structures::types::{KeyDerivation, KeyImage, PublicKey, SecretKey};
use crate::errors::{CryptoError, CryptoResult};

fn wide_hash(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&wide_hash(parts))
}

fn hash_to_point(bytes: &[u8]) -> RistrettoPoint {
    RistrettoPoint::from_uniform_bytes(&wide_hash(&[bytes]))
}

/// Varint encoding used for output indexes in the derivation hash
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn decompress(key: &PublicKey) -> CryptoResult<RistrettoPoint> {
    CompressedRistretto(*key.as_bytes())
        .decompress()
        .ok_or(CryptoError::InvalidPublicKey)
}

fn to_scalar(key: &SecretKey) -> CryptoResult<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*key.as_bytes()))
        .ok_or(CryptoError::InvalidSecretKey)
}

fn derivation_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    let mut index = Vec::with_capacity(10);
    encode_varint(output_index, &mut index);
    hash_to_scalar(&[derivation.as_bytes().as_slice(), index.as_slice()])
}

fn random_scalar() -> Scalar {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Whether the bytes decode to a valid group element
pub fn check_key(key: &PublicKey) -> bool {
    decompress(key).is_ok()
}

/// Generate a fresh random key pair
pub fn generate_keys() -> (PublicKey, SecretKey) {
    let secret = random_scalar();
    let public = RistrettoPoint::mul_base(&secret).compress();
    (
        PublicKey::from_bytes(public.to_bytes()),
        SecretKey::from_bytes(secret.to_bytes()),
    )
}

pub fn secret_key_to_public_key(secret: &SecretKey) -> CryptoResult<PublicKey> {
    let scalar = to_scalar(secret)?;
    Ok(PublicKey::from_bytes(
        RistrettoPoint::mul_base(&scalar).compress().to_bytes(),
    ))
}

/// Deterministic view key pair from a spend secret, so a single secret
/// restores the whole wallet
pub fn view_keys_from_spend_key(spend: &SecretKey) -> CryptoResult<(PublicKey, SecretKey)> {
    to_scalar(spend)?;
    let scalar = hash_to_scalar(&[b"view".as_slice(), spend.as_bytes().as_slice()]);
    let secret = SecretKey::from_bytes(scalar.to_bytes());
    let public = secret_key_to_public_key(&secret)?;
    Ok((public, secret))
}

/// `D = a * R`
pub fn generate_key_derivation(
    transaction_public_key: &PublicKey,
    private_view_key: &SecretKey,
) -> CryptoResult<KeyDerivation> {
    let point = decompress(transaction_public_key)?;
    let scalar = to_scalar(private_view_key)?;
    Ok(KeyDerivation::from_bytes((scalar * point).compress().to_bytes()))
}

/// `P = Hs(D || i) * G + B`
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    public_spend_key: &PublicKey,
) -> CryptoResult<PublicKey> {
    let base = decompress(public_spend_key)?;
    let offset = RistrettoPoint::mul_base(&derivation_scalar(derivation, output_index));
    Ok(PublicKey::from_bytes((offset + base).compress().to_bytes()))
}

/// `B = P - Hs(D || i) * G`, the spend key an output was addressed to
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    output_key: &PublicKey,
) -> CryptoResult<PublicKey> {
    let point = decompress(output_key)?;
    let offset = RistrettoPoint::mul_base(&derivation_scalar(derivation, output_index));
    Ok(PublicKey::from_bytes((point - offset).compress().to_bytes()))
}

/// `x = Hs(D || i) + b`
pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: u64,
    private_spend_key: &SecretKey,
) -> CryptoResult<SecretKey> {
    let base = to_scalar(private_spend_key)?;
    let secret = derivation_scalar(derivation, output_index) + base;
    Ok(SecretKey::from_bytes(secret.to_bytes()))
}

/// `I = x * Hp(P)`
pub fn generate_key_image(
    output_public_key: &PublicKey,
    output_secret_key: &SecretKey,
) -> CryptoResult<KeyImage> {
    let scalar = to_scalar(output_secret_key)?;
    let point = hash_to_point(output_public_key.as_bytes());
    Ok(KeyImage::from_bytes((scalar * point).compress().to_bytes()))
}

/// Derive the one-time key pair of an owned output and its key image
pub fn generate_key_image_for_output(
    derivation: &KeyDerivation,
    output_index: u64,
    public_spend_key: &PublicKey,
    private_spend_key: &SecretKey,
) -> CryptoResult<KeyImage> {
    let output_public = derive_public_key(derivation, output_index, public_spend_key)?;
    let output_secret = derive_secret_key(derivation, output_index, private_spend_key)?;
    generate_key_image(&output_public, &output_secret)
}
