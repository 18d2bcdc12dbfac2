//! Signing and secret handling.
//!
//! - HMAC-SHA256 delivery signatures (pure, deterministic)
//! - Signing-secret generation for registrations without one
//! - AES-256-GCM encryption for secrets at rest

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::EngineError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Prefix for generated signing secrets.
const SECRET_PREFIX: &str = "whsec_";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Delivery signatures
// ---------------------------------------------------------------------------

/// Compute the hex HMAC-SHA256 signature for one delivery.
///
/// The MAC covers `timestamp || payload` so receivers can both verify
/// authenticity and reject stale deliveries. Deterministic: identical inputs
/// always produce the identical signature string.
#[must_use]
pub fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(payload);

    hex::encode(mac.finalize().into_bytes())
}

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a fresh signing secret (`whsec_` + 32 random bytes, hex).
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Generate a fresh 32-byte at-rest encryption key.
#[must_use]
pub fn generate_encryption_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

// ---------------------------------------------------------------------------
// At-rest encryption
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret for storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, EngineError> {
    let cipher = build_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| EngineError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a stored secret back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, EngineError> {
    let cipher = build_cipher(key)?;

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| EngineError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() <= NONCE_SIZE {
        return Err(EngineError::EncryptionFailed(
            "Encrypted secret too short".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let plaintext = cipher
        .decrypt(nonce, &encrypted[NONCE_SIZE..])
        .map_err(|e| EngineError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| EngineError::EncryptionFailed(e.to_string()))
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, EngineError> {
    if key.len() != 32 {
        return Err(EngineError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| EngineError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
