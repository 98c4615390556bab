use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM cipher for stored response envelopes and encrypted columns.
///
/// Payload layout is base64(nonce || tag || ciphertext) with a fresh random
/// nonce per encryption. Constructed once at startup from hex key material
/// and passed down explicitly.
#[derive(Clone)]
pub struct Aes256GcmCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Aes256GcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256GcmCipher").finish_non_exhaustive()
    }
}

impl Aes256GcmCipher {
    /// Parses a 64-hex-character key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        if hex_key.len() != KEY_LEN * 2 {
            return Err(AppError::Configuration(format!(
                "AES-256-GCM key must be {} hex characters, got {}",
                KEY_LEN * 2,
                hex_key.len()
            )));
        }

        let bytes = hex::decode(hex_key)
            .map_err(|e| AppError::Configuration(format!("invalid AES-256-GCM key: {}", e)))?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);

        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| AppError::Configuration("invalid AES-256-GCM key length".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; the stored layout keeps
        // the tag up front, after the nonce.
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("AES-256-GCM encryption failed")))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut payload = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(tag);
        payload.extend_from_slice(ciphertext);

        Ok(BASE64.encode(payload))
    }

    pub fn decrypt(&self, base64_payload: &str) -> Result<String> {
        let payload = BASE64
            .decode(base64_payload)
            .map_err(|e| AppError::Corruption(format!("payload is not valid base64: {}", e)))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(AppError::Corruption(
                "payload shorter than nonce and tag".to_string(),
            ));
        }

        let (nonce_bytes, rest) = payload.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| AppError::Configuration("invalid AES-256-GCM key length".to_string()))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| AppError::Corruption("AES-256-GCM decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| AppError::Corruption("decrypted payload is not UTF-8".to_string()))
    }
}

/// Computes the lowercase hex SHA-256 digest of a message.
pub fn sha256_hex(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic lookup hash for an email address.
pub fn hash_email(email: &str) -> String {
    sha256_hex(&format!("email:{}", email))
}

pub fn hash_password(password: &str) -> String {
    sha256_hex(&format!("password:{}", password))
}
