use std::fmt;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand_core::{OsRng, RngCore};

use crate::error::{AppError, AppResult};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Server-held symmetric key protecting all key material at rest.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> AppResult<Self> {
        let decoded = hex::decode(encoded.trim())
            .map_err(|e| AppError::EncodingFailure(format!("encryption key is not hex: {e}")))?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|raw: Vec<u8>| {
            AppError::EncodingFailure(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Seals `plaintext` under a fresh random nonce. Output layout is
    /// `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| AppError::EncodingFailure(format!("encrypt key material: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> AppResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(AppError::EncodingFailure(
                "ciphertext shorter than nonce".into(),
            ));
        }
        let (nonce, body) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| {
                AppError::EncodingFailure("decrypt key material: authentication tag mismatch".into())
            })
    }

    /// Encrypts and renders the result as lowercase hex so it can live in a
    /// text column.
    pub fn seal_hex(&self, plaintext: &[u8]) -> AppResult<String> {
        self.encrypt(plaintext).map(hex::encode)
    }

    pub fn open_hex(&self, encoded: &str) -> AppResult<Vec<u8>> {
        let sealed = hex::decode(encoded)
            .map_err(|e| AppError::EncodingFailure(format!("decode hex: {e}")))?;
        self.decrypt(&sealed)
    }
}

/// Fresh random key material for a team API key.
pub fn generate_api_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_lengths() {
        let key = EncryptionKey::generate();
        for input in [
            &b""[..],
            &b"a"[..],
            &b"cryptographically secure"[..],
            &[0xffu8; 300][..],
        ] {
            let sealed = key.seal_hex(input).unwrap();
            assert_eq!(key.open_hex(&sealed).unwrap(), input);
        }
    }

    #[test]
    fn same_plaintext_yields_distinct_ciphertexts() {
        let key = EncryptionKey::generate();
        let a = key.seal_hex(b"abcdef").unwrap();
        let b = key.seal_hex(b"abcdef").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_an_encoding_failure() {
        let sealed = EncryptionKey::generate().seal_hex(b"secret").unwrap();
        let err = EncryptionKey::generate().open_hex(&sealed).unwrap_err();
        assert!(matches!(err, AppError::EncodingFailure(_)));
    }

    #[test]
    fn corrupted_hex_is_an_encoding_failure() {
        let key = EncryptionKey::generate();
        assert!(matches!(
            key.open_hex("zz-not-hex"),
            Err(AppError::EncodingFailure(_))
        ));
        assert!(matches!(key.open_hex("abcd"), Err(AppError::EncodingFailure(_))));
    }

    #[test]
    fn parses_hex_key_of_exact_length() {
        let encoded = "11".repeat(KEY_LEN);
        assert!(EncryptionKey::from_hex(&encoded).is_ok());
        assert!(EncryptionKey::from_hex("1122").is_err());
    }
}
