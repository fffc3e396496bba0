//! Credential vault: symmetric encryption of account passwords at rest.
//!
//! Passwords are encrypted with AES-256-GCM before they are stored in the
//! archive database. The key is loaded once at process start from the
//! `MAILKEEP_SECRET_KEY` environment variable (64 hex chars = 32 bytes).
//! A lost or rotated key makes every stored password unreadable; that
//! surfaces as a per-account [`VaultError::Decryption`], never as corrupted
//! plaintext and never as a process-wide failure.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretString};

/// Encryption key environment variable name.
pub const SECRET_KEY_ENV_VAR: &str = "MAILKEEP_SECRET_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Errors raised by the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Password vault using AES-256-GCM.
///
/// Ciphertext format: `<12-byte nonce><ciphertext>`, hex-encoded.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Creates a vault from the `MAILKEEP_SECRET_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var(SECRET_KEY_ENV_VAR).map_err(|_| {
            VaultError::InvalidKey(format!(
                "Environment variable {} not set",
                SECRET_KEY_ENV_VAR
            ))
        })?;

        Self::from_hex_key(key_hex.trim())
    }

    /// Creates a vault from a hex-encoded 32-byte key (64 hex chars).
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex)
            .map_err(|e| VaultError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(VaultError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| VaultError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts a password and returns hex-encoded ciphertext with prepended nonce.
    pub fn encrypt(&self, password: &SecretString) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, password.expose_secret().as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(hex_encode(&combined))
    }

    /// Decrypts hex-encoded ciphertext (with prepended nonce) back to the password.
    ///
    /// Fails with [`VaultError::Decryption`] if the ciphertext was produced
    /// under a different key or has been tampered with.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<SecretString> {
        let combined = hex_decode(ciphertext_hex)
            .map_err(|e| VaultError::Decryption(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(VaultError::Decryption("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Decryption(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map(SecretString::from)
            .map_err(|e| VaultError::Decryption(format!("Invalid UTF-8: {}", e)))
    }
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes hex string to bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using the system RNG.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)
        .map_err(|e| VaultError::Encryption(format!("Failed to generate random bytes: {}", e)))?;
    Ok(bytes)
}
