//! Token encryption for at-rest credential storage.
//!
//! OAuth tokens are sealed with AES-256-GCM before they touch the accounts
//! table. Each value carries its own random nonce, so the stored blob is
//! self-describing: `nonce || ciphertext || tag`, base64-encoded as one
//! opaque string.
//!
//! The 32-byte key is supplied base64-encoded via configuration
//! (`openssl rand -base64 32`). Validation is lazy: a missing or malformed
//! key surfaces on first use, not at startup.

use base64::prelude::*;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Required decoded key length for AES-256.
const KEY_LEN: usize = 32;

/// Errors that can occur during token sealing and opening.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is not configured")]
    KeyMissing,

    #[error("encryption key is invalid: {0}")]
    InvalidKey(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Result type for cipher operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Authenticated symmetric cipher for credential values.
///
/// Holds the still-encoded key; decoding and length validation happen on
/// each use so that a misconfigured key fails the affected operation
/// instead of aborting the whole process.
pub struct TokenCipher {
    key_base64: Option<String>,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Creates a cipher around an optional base64-encoded 256-bit key.
    pub fn new(key_base64: Option<String>) -> Self {
        Self {
            key_base64,
            rng: SystemRandom::new(),
        }
    }

    fn key(&self) -> Result<LessSafeKey> {
        let encoded = self.key_base64.as_deref().ok_or(CryptoError::KeyMissing)?;
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidKey("not valid base64".to_string()))?;

        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {} (use: openssl rand -base64 32)",
                KEY_LEN,
                bytes.len()
            )));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, &bytes)
            .map_err(|_| CryptoError::InvalidKey("rejected by cipher".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Seals a plaintext value into an opaque base64 blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = self.key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + buffer.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&buffer);

        Ok(BASE64_STANDARD.encode(blob))
    }

    /// Opens a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: any truncation, tampering, or authentication-tag
    /// mismatch yields [`CryptoError::DecryptionFailed`], never garbage
    /// plaintext.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let key = self.key()?;

        let bytes = BASE64_STANDARD
            .decode(blob)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut buffer = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("TokenCipher")
            .field("key_configured", &self.key_base64.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::new(Some(BASE64_STANDARD.encode([7u8; 32])))
    }

    #[test]
    fn round_trip_preserves_plaintext() {
        let cipher = test_cipher();

        for token in ["ya29.a0AfB_token", "short", "ümlaut-token-ß", "x"] {
            let sealed = cipher.encrypt(token).unwrap();
            assert_ne!(sealed, token);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), token);
        }
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = test_cipher();

        let a = cipher.encrypt("same-token").unwrap();
        let b = cipher.encrypt("same-token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("secret-token").unwrap();

        let mut bytes = BASE64_STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64_STANDARD.encode(bytes);

        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_blob_fails_closed() {
        let cipher = test_cipher();
        assert!(matches!(
            cipher.decrypt("AAAA"),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(matches!(
            cipher.decrypt("not base64 at all!"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn missing_key_surfaces_on_use() {
        let cipher = TokenCipher::new(None);
        assert!(matches!(
            cipher.encrypt("token"),
            Err(CryptoError::KeyMissing)
        ));
        assert!(matches!(
            cipher.decrypt("blob"),
            Err(CryptoError::KeyMissing)
        ));
    }

    #[test]
    fn wrong_length_key_is_rejected() {
        let cipher = TokenCipher::new(Some(BASE64_STANDARD.encode([1u8; 16])));
        assert!(matches!(
            cipher.encrypt("token"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn value_encrypted_with_one_key_does_not_open_with_another() {
        let cipher_a = TokenCipher::new(Some(BASE64_STANDARD.encode([1u8; 32])));
        let cipher_b = TokenCipher::new(Some(BASE64_STANDARD.encode([2u8; 32])));

        let sealed = cipher_a.encrypt("token").unwrap();
        assert!(matches!(
            cipher_b.decrypt(&sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
