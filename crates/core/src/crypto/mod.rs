pub mod chunk_cipher;

pub use chunk_cipher::{
    decrypt_chunk, encrypt_chunk, ChunkCipher, CryptoError, EncryptedChunk, TransferKey,
    MIN_CHUNK_LEN,
};
