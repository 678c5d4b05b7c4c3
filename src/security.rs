//! Credential encryption at rest and scoped decryption.
//!
//! Each credential field is stored as `base64(nonce || ciphertext)` under a
//! ChaCha20-Poly1305 key supplied through `ENCRYPTION_KEY`. Decrypted values
//! live in [`ApiCredentials`], which wipes its memory when dropped.

use std::fmt;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CopyError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Credential bundle as stored: every field encrypted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EncryptedCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub private_key: String,
}

/// Decrypted exchange credentials. Zeroized on drop.
#[derive(Default, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Hex signing key used for order signatures
    pub private_key: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("api_passphrase", &"<redacted>")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Symmetric cipher for the credential store.
pub struct CredentialCipher {
    cipher: ChaCha20Poly1305,
}

impl CredentialCipher {
    /// Build from a base64-encoded 32-byte key. Quotes and whitespace around
    /// the key are tolerated.
    pub fn from_base64_key(encoded: &str) -> anyhow::Result<Self> {
        let cleaned = encoded.trim().trim_matches('"').trim_matches('\'');
        let mut bytes = BASE64
            .decode(cleaned)
            .context("ENCRYPTION_KEY is not valid base64")?;

        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            bail!("ENCRYPTION_KEY must decode to 32 bytes, got {}", len);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&bytes));
        bytes.zeroize();

        Ok(Self { cipher })
    }

    /// Generate a fresh base64 key suitable for `ENCRYPTION_KEY`.
    pub fn generate_key() -> String {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        BASE64.encode(key)
    }

    pub fn encrypt_field(&self, plaintext: &str) -> Result<String, CopyError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CopyError::Decrypt("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt_field(&self, encoded: &str) -> Result<String, CopyError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| CopyError::Decrypt(format!("invalid encoding: {}", e)))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CopyError::Decrypt("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plain = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CopyError::Decrypt("key is wrong or data is corrupted".to_string()))?,
        );

        std::str::from_utf8(&plain)
            .map(str::to_owned)
            .map_err(|_| CopyError::Decrypt("plaintext is not utf-8".to_string()))
    }

    pub fn encrypt(&self, creds: &ApiCredentials) -> Result<EncryptedCredentials, CopyError> {
        Ok(EncryptedCredentials {
            api_key: self.encrypt_field(&creds.api_key)?,
            api_secret: self.encrypt_field(&creds.api_secret)?,
            api_passphrase: self.encrypt_field(&creds.api_passphrase)?,
            private_key: self.encrypt_field(&creds.private_key)?,
        })
    }

    /// Decrypt a stored bundle. Fields already decrypted are wiped if a later
    /// field fails.
    pub fn decrypt(&self, stored: &EncryptedCredentials) -> Result<ApiCredentials, CopyError> {
        let mut creds = ApiCredentials::default();
        creds.api_key = self.decrypt_field(&stored.api_key)?;
        creds.api_secret = self.decrypt_field(&stored.api_secret)?;
        creds.api_passphrase = self.decrypt_field(&stored.api_passphrase)?;
        creds.private_key = self.decrypt_field(&stored.private_key)?;
        Ok(creds)
    }
}
