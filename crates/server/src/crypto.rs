use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use std::fmt;
use thiserror::Error;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Encrypts stored router credentials. Output is hex of nonce followed by
/// ciphertext.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

impl CredentialCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKey(
                "key must be 32 bytes (256 bits) long".to_string(),
            ));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(key.into()),
        })
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let key_bytes =
            hex::decode(key_hex).map_err(|e| CryptoError::InvalidKey(format!("invalid hex: {e}")))?;
        Self::new(&key_bytes)
    }

    pub fn encrypt(&self, plain_text: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(hex::encode(result))
    }

    pub fn decrypt(&self, cipher_hex: &str) -> Result<String, CryptoError> {
        let encrypted_data = hex::decode(cipher_hex)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("invalid hex: {e}")))?;
        if encrypted_data.len() < NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(
                "too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let decrypted_bytes = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(decrypted_bytes)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("invalid UTF-8: {e}")))
    }
}
