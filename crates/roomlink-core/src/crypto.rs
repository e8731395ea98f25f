use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{LinkError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const KEY_REFERENCE_LEN: usize = 16;
/// Poly1305 authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

const STORE_KEY_INFO: &[u8] = b"roomlink/stored-link/v1";
const KEY_REFERENCE_INFO: &[u8] = b"roomlink/key-reference/v1";

/// Derives the link sealing key from the keystore master secret.
pub fn derive_store_key(master: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(STORE_KEY_INFO, &mut okm[..])
        .map_err(|e| LinkError::Keystore(format!("hkdf expand: {e}")))?;
    Ok(okm)
}

/// Stable, non-secret fingerprint identifying which key sealed a blob.
pub fn key_reference(key: &[u8; KEY_LEN]) -> [u8; KEY_REFERENCE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_REFERENCE_INFO);
    hasher.update(key);
    let digest = hasher.finalize();
    let mut out = [0u8; KEY_REFERENCE_LEN];
    out.copy_from_slice(&digest[..KEY_REFERENCE_LEN]);
    out
}

pub fn encrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| LinkError::Keystore(format!("encrypt: {e}")))
}

pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| LinkError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}

pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| LinkError::EntropyUnavailable(e.to_string()))?;
    Ok(nonce)
}

pub fn generate_master_secret() -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut secret = Zeroizing::new([0u8; KEY_LEN]);
    OsRng
        .try_fill_bytes(&mut secret[..])
        .map_err(|e| LinkError::EntropyUnavailable(e.to_string()))?;
    Ok(secret)
}
