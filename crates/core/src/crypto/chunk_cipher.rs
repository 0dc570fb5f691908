use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use hiddendrop_common::config::crypto::{IV_LEN, KEY_LEN, TAG_LEN};
use hiddendrop_common::HiddenDropError;
use rand::RngCore;
use zeroize::Zeroizing;

/// AES-256-GCM with a 16-byte IV and a 16-byte tag
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Smallest valid wire unit: IV and tag with an empty ciphertext
pub const MIN_CHUNK_LEN: usize = IV_LEN + TAG_LEN;

/// Symmetric key for one transfer attempt. Wiped when dropped.
pub struct TransferKey(Zeroizing<[u8; KEY_LEN]>);

impl TransferKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    /// Accept externally supplied key material; must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransferKey(<redacted>)")
    }
}

/// One encrypted chunk as it travels: `iv || auth_tag || ciphertext`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedChunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(MIN_CHUNK_LEN + self.ciphertext.len());
        wire.extend_from_slice(&self.iv);
        wire.extend_from_slice(&self.auth_tag);
        wire.extend_from_slice(&self.ciphertext);
        wire
    }

    pub fn from_bytes(wire: &[u8]) -> Result<Self, CryptoError> {
        if wire.len() < MIN_CHUNK_LEN {
            return Err(CryptoError::MalformedChunk { len: wire.len() });
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&wire[..IV_LEN]);
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&wire[IV_LEN..MIN_CHUNK_LEN]);

        Ok(Self {
            iv,
            auth_tag,
            ciphertext: wire[MIN_CHUNK_LEN..].to_vec(),
        })
    }
}

/// Per-attempt chunk cipher
///
/// Every call to [`ChunkCipher::encrypt`] draws a new random IV, so one key
/// can safely cover all chunks of an attempt.
pub struct ChunkCipher {
    cipher: Aes256Gcm16,
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("cipher", &"<AES-256-GCM>")
            .finish()
    }
}

impl ChunkCipher {
    pub fn new(key: &TransferKey) -> Self {
        Self {
            cipher: Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes())),
        }
    }

    /// Build a cipher from raw key bytes, rejecting anything but 32 bytes
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        let key = TransferKey::from_slice(key)?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedChunk, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(tag.as_slice());

        Ok(EncryptedChunk {
            iv,
            auth_tag,
            ciphertext: buffer,
        })
    }

    /// Verify and decrypt. The working buffer is dropped on failure, so no
    /// unauthenticated bytes escape.
    pub fn decrypt(&self, chunk: &EncryptedChunk) -> Result<Vec<u8>, CryptoError> {
        let mut buffer = chunk.ciphertext.clone();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&chunk.iv),
                b"",
                &mut buffer,
                Tag::<U16>::from_slice(&chunk.auth_tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailure)?;
        Ok(buffer)
    }

    /// Decrypt a raw wire unit
    pub fn decrypt_wire(&self, wire: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let chunk = EncryptedChunk::from_bytes(wire)?;
        self.decrypt(&chunk)
    }
}

/// Encrypt one chunk under a raw 32-byte key
pub fn encrypt_chunk(plaintext: &[u8], key: &[u8]) -> Result<EncryptedChunk, CryptoError> {
    ChunkCipher::from_key_bytes(key)?.encrypt(plaintext)
}

/// Decrypt one wire unit under a raw 32-byte key
pub fn decrypt_chunk(wire: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChunkCipher::from_key_bytes(key)?.decrypt_wire(wire)
}

/// Cryptographic errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Chunk authentication failed")]
    AuthenticationFailure,

    #[error("Malformed chunk: {len} bytes is shorter than IV and tag")]
    MalformedChunk { len: usize },

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

impl From<CryptoError> for HiddenDropError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => HiddenDropError::AuthenticationFailure,
            CryptoError::MalformedChunk { len } => {
                HiddenDropError::MalformedChunk(format!("{} bytes", len))
            }
            CryptoError::InvalidKeyLength { expected, actual } => {
                HiddenDropError::InvalidKeyLength { expected, actual }
            }
            CryptoError::EncryptionFailed => HiddenDropError::internal("chunk encryption failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_various_sizes() {
        let key = TransferKey::generate();
        let cipher = ChunkCipher::new(&key);

        for size in [0usize, 1, 15, 16, 17, 1024, 16 * 1024] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let chunk = cipher.encrypt(&plaintext).unwrap();
            assert_eq!(chunk.ciphertext.len(), plaintext.len());

            let wire = chunk.to_bytes();
            assert_eq!(wire.len(), MIN_CHUNK_LEN + size);
            assert_eq!(cipher.decrypt_wire(&wire).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_iv_per_chunk() {
        let cipher = ChunkCipher::new(&TransferKey::generate());
        let a = cipher.encrypt(b"same bytes").unwrap();
        let b = cipher.encrypt(b"same bytes").unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let cipher = ChunkCipher::new(&TransferKey::generate());
        let wire = cipher.encrypt(b"attack at dawn").unwrap().to_bytes();

        for byte in 0..wire.len() {
            for bit in 0..8 {
                let mut tampered = wire.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    cipher.decrypt_wire(&tampered),
                    Err(CryptoError::AuthenticationFailure),
                    "flip of byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let chunk = encrypt_chunk(b"hello", &[1u8; KEY_LEN]).unwrap();
        let err = decrypt_chunk(&chunk.to_bytes(), &[2u8; KEY_LEN]).unwrap_err();
        assert_eq!(err, CryptoError::AuthenticationFailure);
    }

    #[test]
    fn test_short_wire_unit_is_malformed() {
        let err = decrypt_chunk(&[0u8; MIN_CHUNK_LEN - 1], &[1u8; KEY_LEN]).unwrap_err();
        assert_eq!(err, CryptoError::MalformedChunk { len: MIN_CHUNK_LEN - 1 });
    }

    #[test]
    fn test_key_length_checked_up_front() {
        for len in [0usize, 16, 31, 33, 64] {
            let err = ChunkCipher::from_key_bytes(&vec![0u8; len]).unwrap_err();
            assert_eq!(
                err,
                CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn test_raw_key_helpers_interoperate() {
        let key = TransferKey::generate();
        let chunk = ChunkCipher::new(&key).encrypt(b"interop").unwrap();
        let plain = decrypt_chunk(&chunk.to_bytes(), key.as_bytes()).unwrap();
        assert_eq!(plain, b"interop");
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = TransferKey::from_slice(&[0x41; KEY_LEN]).unwrap();
        assert_eq!(format!("{:?}", key), "TransferKey(<redacted>)");
    }
}
