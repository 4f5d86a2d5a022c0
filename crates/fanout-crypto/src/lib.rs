//! fanout-crypto: stateless per-chunk block cipher
//!
//! AES-256-CBC with PKCS#7 padding. Every chunk of a job is encrypted on its
//! own with the job's single `(key, iv)` pair:
//! ```text
//! chunk_i ciphertext = AES-256-CBC(key, iv, PKCS7(chunk_i))
//! file ciphertext    = chunk_0 ciphertext || chunk_1 ciphertext || ...
//! ```
//! No cipher state carries over between chunks, so chunks can be processed
//! on any worker in any order. The output is therefore not a single CBC
//! stream, and every chunk's first block starts from the same iv: equal
//! chunk prefixes produce equal ciphertext prefixes. Files written this way
//! must be decrypted with the same chunk layout.

pub mod engine;
pub mod error;
pub mod keys;

pub use engine::{ciphertext_chunk_size, decrypt, encrypt};
pub use error::CipherError;
pub use keys::{generate_key_iv, KeyMaterial};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// CBC iv size in bytes
pub const IV_SIZE: usize = 16;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Size of a persisted key file: `key || iv`
pub const KEY_FILE_SIZE: usize = KEY_SIZE + IV_SIZE;
