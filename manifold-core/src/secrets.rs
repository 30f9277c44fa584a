//! # Credential Decryption
//!
//! Provider credentials are stored encrypted at rest by the catalog owner;
//! the engine only ever needs the plaintext for the duration of a probe or a
//! dispatch. [`SecretCipher`] is the capability the engine consumes —
//! encryption, key management and rotation live with the catalog, not here.

use thiserror::Error;

/// Credential could not be turned into a usable plaintext.
#[derive(Error, Debug, Clone)]
#[error("decrypt failed: {message}")]
pub struct DecryptError {
    pub message: String,
}

impl DecryptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Decryption capability consumed by the prober and the dispatch pipeline.
pub trait SecretCipher: Send + Sync {
    /// Turn a stored ciphertext into the plaintext credential.
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError>;
}

/// Base64 at-rest scheme. Ciphertexts carry a `b64:` prefix; anything else
/// is rejected so a misconfigured catalog fails loudly instead of sending a
/// garbled credential upstream.
#[derive(Debug, Default, Clone)]
pub struct Base64Cipher;

impl SecretCipher for Base64Cipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        use base64::Engine;

        let encoded = ciphertext
            .strip_prefix("b64:")
            .ok_or_else(|| DecryptError::new("ciphertext missing b64: prefix"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DecryptError::new(format!("invalid base64: {e}")))?;
        String::from_utf8(bytes).map_err(|_| DecryptError::new("credential is not valid UTF-8"))
    }
}

/// Identity scheme for development and tests: the stored value is the
/// credential.
#[derive(Debug, Default, Clone)]
pub struct PlaintextCipher;

impl SecretCipher for PlaintextCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        Ok(ciphertext.to_string())
    }
}
