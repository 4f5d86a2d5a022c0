//! Job key material: generation and `key || iv` file persistence

use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroize;

use crate::{CipherError, IV_SIZE, KEY_FILE_SIZE, KEY_SIZE};

/// The `(key, iv)` pair shared by every chunk of one job. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl KeyMaterial {
    pub fn from_parts(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Parse `key || iv` (exactly 48 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_FILE_SIZE {
            return Err(CipherError::InvalidKeyFile(bytes.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self { key, iv })
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Serialized form: `key || iv`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_FILE_SIZE);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    /// Write the key file, creating parent directories. On Unix the file is
    /// created with mode 0600.
    pub fn save(&self, path: &Path) -> Result<(), CipherError> {
        let io_err = |e: std::io::Error| CipherError::KeyFileIo {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut bytes = self.to_bytes();
        let result = write_private(path, &bytes).map_err(io_err);
        bytes.zeroize();
        result?;

        tracing::debug!(path = %path.display(), "key material saved");
        Ok(())
    }

    /// Read a key file written by [`KeyMaterial::save`].
    pub fn load(path: &Path) -> Result<Self, CipherError> {
        let mut bytes = std::fs::read(path).map_err(|e| CipherError::KeyFileIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let result = Self::from_bytes(&bytes);
        bytes.zeroize();
        result
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// Draw a fresh 256-bit key and 128-bit iv from the OS random source.
pub fn generate_key_iv() -> Result<KeyMaterial, CipherError> {
    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| CipherError::Entropy(e.to_string()))?;
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CipherError::Entropy(e.to_string()))?;
    let material = KeyMaterial::from_parts(key, iv);
    key.zeroize();
    iv.zeroize();
    Ok(material)
}
