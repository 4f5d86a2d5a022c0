pub mod config;
pub mod error;
pub mod tls;
pub mod types;

pub use error::{FanoutError, FanoutResult};
pub use types::{Chunk, CipherMode, Job, TransportMode, WorkerEndpoint};

/// Generated gRPC types and service traits (from fanout.proto)
pub mod proto {
    tonic::include_proto!("fanout");
}

/// Largest gRPC message either side will encode or decode.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
