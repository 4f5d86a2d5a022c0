//! fanoutd: stateless worker for distributed chunk encryption
//!
//! Each worker exposes `EncryptChunk`, `DecryptChunk` and `TestConnection`
//! over gRPC. No state is kept between calls; the coordinator sends the key
//! material with every chunk.

pub mod grpc;
pub mod metrics;
pub mod server;

pub use grpc::EncryptionWorker;
pub use metrics::WorkerMetrics;
pub use server::{run_server, serve_incoming};
