//! AES-256-GCM payload cipher
//!
//! TDF3 payload segments are laid out as `IV || ciphertext || tag` with a
//! 16-byte IV and a 16-byte tag. The archive codec never calls into this
//! module; it produces the ciphertext that is later streamed into
//! `0.payload`.

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    aes::Aes256,
    AesGcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// AES-256-GCM with the 16-byte IV used by TDF3 segments
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    AeadError(aes_gcm::Error),
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Invalid IV length: expected 16 bytes, got {0}")]
    InvalidIvLength(usize),
    #[error("Segment of {0} bytes is too short for IV and tag")]
    SegmentTooShort(usize),
}

/// Payload key plus the GCM cipher built from it
pub struct PayloadCipher {
    cipher: Aes256Gcm16,
}

impl PayloadCipher {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        let cipher = Aes256Gcm16::new_from_slice(key)
            .map_err(|_| EncryptionError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Creates a cipher over a freshly generated key, returning both
    pub fn generate() -> Result<(Self, Vec<u8>), EncryptionError> {
        let mut key = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Ok((Self::new(&key)?, key))
    }

    /// Encrypts with the given IV, returning ciphertext with the tag appended
    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if iv.len() != IV_SIZE {
            return Err(EncryptionError::InvalidIvLength(iv.len()));
        }
        self.cipher
            .encrypt(Nonce::<U16>::from_slice(iv), plaintext)
            .map_err(EncryptionError::AeadError)
    }

    /// Decrypts ciphertext with its tag appended
    pub fn decrypt(
        &self,
        iv: &[u8],
        ciphertext_and_tag: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        if iv.len() != IV_SIZE {
            return Err(EncryptionError::InvalidIvLength(iv.len()));
        }
        self.cipher
            .decrypt(Nonce::<U16>::from_slice(iv), ciphertext_and_tag)
            .map_err(EncryptionError::AeadError)
    }

    /// Encrypts one segment under a random IV, producing `IV || ciphertext || tag`
    pub fn encrypt_segment(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let sealed = self.encrypt(&iv, plaintext)?;

        let mut segment = Vec::with_capacity(IV_SIZE + sealed.len());
        segment.extend_from_slice(&iv);
        segment.extend_from_slice(&sealed);
        Ok(segment)
    }

    /// Decrypts a segment produced by [`encrypt_segment`](Self::encrypt_segment)
    pub fn decrypt_segment(&self, segment: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if segment.len() < IV_SIZE + TAG_SIZE {
            return Err(EncryptionError::SegmentTooShort(segment.len()));
        }
        let (iv, sealed) = segment.split_at(IV_SIZE);
        self.decrypt(iv, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_round_trip() -> Result<(), EncryptionError> {
        let (cipher, key) = PayloadCipher::generate()?;
        assert_eq!(key.len(), KEY_SIZE);

        let segment = cipher.encrypt_segment(b"sensitive payload data")?;
        assert_eq!(segment.len(), IV_SIZE + 22 + TAG_SIZE);
        assert_eq!(
            cipher.decrypt_segment(&segment)?,
            b"sensitive payload data"
        );
        Ok(())
    }

    #[test]
    fn test_tampered_segment_fails() -> Result<(), EncryptionError> {
        let (cipher, _) = PayloadCipher::generate()?;
        let mut segment = cipher.encrypt_segment(b"data")?;
        let last = segment.len() - 1;
        segment[last] ^= 1;
        assert!(matches!(
            cipher.decrypt_segment(&segment),
            Err(EncryptionError::AeadError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(matches!(
            PayloadCipher::new(&[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength(16))
        ));
        let cipher = PayloadCipher::new(&[7u8; KEY_SIZE]).unwrap();
        assert!(matches!(
            cipher.encrypt(&[0u8; 12], b"x"),
            Err(EncryptionError::InvalidIvLength(12))
        ));
        assert!(matches!(
            cipher.decrypt_segment(&[0u8; 20]),
            Err(EncryptionError::SegmentTooShort(20))
        ));
    }
}
