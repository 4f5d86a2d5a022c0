use std::path::PathBuf;

use thiserror::Error;

pub type FanoutResult<T> = Result<T, FanoutError>;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("transport error ({endpoint}): {message}")]
    Transport { endpoint: String, message: String },

    #[error("worker {worker} failed chunk {chunk_id}: {message}")]
    WorkerReported {
        chunk_id: u32,
        worker: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("job has no chunks")]
    EmptyJob,

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FanoutError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// True for failures that abort a job under the abort-on-first-failure policy
    /// because a worker could not produce a chunk.
    pub fn is_chunk_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::WorkerReported { .. } | Self::Protocol(_) | Self::Grpc(_)
        )
    }
}
