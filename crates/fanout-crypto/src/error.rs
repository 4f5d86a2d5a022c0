use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key size: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid iv size: expected 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("invalid ciphertext length {0}: must be a non-zero multiple of 16")]
    InvalidCiphertextLength(usize),

    #[error("invalid key file: expected 48 bytes, got {0}")]
    InvalidKeyFile(usize),

    #[error("key file {path}: {message}")]
    KeyFileIo { path: String, message: String },

    #[error("padding check failed: corrupted ciphertext or wrong key/iv")]
    Integrity,

    #[error("random source unavailable: {0}")]
    Entropy(String),
}

impl CipherError {
    /// Size/shape problems with the inputs, as opposed to integrity or
    /// entropy failures.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyLength(_)
                | Self::InvalidIvLength(_)
                | Self::InvalidCiphertextLength(_)
                | Self::InvalidKeyFile(_)
        )
    }
}
