use serde::{Deserialize, Serialize};

use crate::{FanoutError, FanoutResult};

/// A contiguous byte range of a file, tagged with its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(id: u32, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Chunk id as carried on the wire (`int32`).
    pub fn wire_id(&self) -> FanoutResult<i32> {
        i32::try_from(self.id).map_err(|_| {
            FanoutError::InvalidArgument(format!("chunk id {} does not fit in int32", self.id))
        })
    }
}

/// One complete pass over a file: chunks in id order, ids `0..n`.
#[derive(Debug, Clone, Default)]
pub struct Job {
    chunks: Vec<Chunk>,
}

impl Job {
    /// Build a job, checking that ids are contiguous from zero in order.
    pub fn new(chunks: Vec<Chunk>) -> FanoutResult<Self> {
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.id as usize != expected {
                return Err(FanoutError::InvalidArgument(format!(
                    "job chunk ids must be contiguous from 0: position {expected} holds id {}",
                    chunk.id
                )));
            }
        }
        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sum of all chunk lengths; equals the source size for a split job.
    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }
}

/// Which cipher direction a job runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

impl CipherMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CipherMode::Encrypt => "encrypt",
            CipherMode::Decrypt => "decrypt",
        }
    }
}

impl std::fmt::Display for CipherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Plaintext,
    Secured,
}

/// A worker address plus the transport used to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub address: String,
    pub transport: TransportMode,
}

impl WorkerEndpoint {
    pub fn new(address: impl Into<String>, transport: TransportMode) -> Self {
        Self {
            address: address.into(),
            transport,
        }
    }

    /// Address with a scheme matching the transport. Bare `host:port` gets
    /// `http://` or `https://`; an explicit scheme is kept as given.
    pub fn uri(&self) -> String {
        if self.address.contains("://") {
            return self.address.clone();
        }
        match self.transport {
            TransportMode::Plaintext => format!("http://{}", self.address),
            TransportMode::Secured => format!("https://{}", self.address),
        }
    }

    /// Host part of the address, used as the TLS verification name.
    pub fn host(&self) -> &str {
        let without_scheme = self
            .address
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.address);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                host.trim_start_matches('[').trim_end_matches(']')
            }
            _ => authority,
        }
    }
}

impl std::fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}
