//! tonic implementation of the EncryptionService
//!
//! Every call is independent: validate sizes, run the cipher, respond.
//! Cipher failures are returned inside the response with `success = false`;
//! the RPC itself always completes with an OK status.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use fanout_core::proto::{
    encryption_service_server::{EncryptionService, EncryptionServiceServer},
    ChunkRequest, ChunkResponse, TestRequest, TestResponse,
};
use fanout_core::{CipherMode, MAX_MESSAGE_SIZE};
use fanout_crypto::{CipherError, IV_SIZE, KEY_SIZE};
use tracing::{debug, info, warn};

use crate::metrics::WorkerMetrics;

/// Stateless chunk cipher worker
#[derive(Clone)]
pub struct EncryptionWorker {
    worker_id: String,
    metrics: WorkerMetrics,
}

impl EncryptionWorker {
    pub fn new(worker_id: impl Into<String>, metrics: WorkerMetrics) -> Self {
        Self {
            worker_id: worker_id.into(),
            metrics,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Wrap the worker in a tonic service with raised message limits.
    pub fn into_service(self) -> EncryptionServiceServer<Self> {
        EncryptionServiceServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }

    /// Run one cipher operation and encode the outcome as a response.
    pub async fn process(&self, mode: CipherMode, request: ChunkRequest) -> ChunkResponse {
        let chunk_id = request.chunk_id;
        let input_len = request.data.len();
        debug!(chunk_id, bytes = input_len, op = %mode, "chunk request received");

        let start = Instant::now();
        let result = match validate(&request) {
            Ok(()) => run_cipher(mode, request).await,
            Err(e) => Err(Failure::Cipher(e)),
        };
        let elapsed = start.elapsed();

        self.metrics
            .observe(mode, result.is_ok(), input_len, elapsed.as_secs_f64());

        match result {
            Ok(processed_data) => {
                debug!(
                    chunk_id,
                    op = %mode,
                    bytes_in = input_len,
                    bytes_out = processed_data.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "chunk processed"
                );
                ChunkResponse {
                    processed_data,
                    chunk_id,
                    success: true,
                    error_message: String::new(),
                }
            }
            Err(failure) => {
                warn!(
                    chunk_id,
                    op = %mode,
                    kind = failure.kind(),
                    error = %failure,
                    "chunk failed"
                );
                ChunkResponse {
                    processed_data: Vec::new(),
                    chunk_id,
                    success: false,
                    error_message: format!("{mode} error: {failure}"),
                }
            }
        }
    }
}

/// Why a chunk produced no output
#[derive(Debug)]
enum Failure {
    Cipher(CipherError),
    Aborted(String),
}

impl Failure {
    /// Short label for logs: bad request shape vs. a cipher or task failure
    fn kind(&self) -> &'static str {
        match self {
            Self::Cipher(e) if e.is_invalid_argument() => "invalid_argument",
            Self::Cipher(CipherError::Integrity) => "integrity",
            Self::Cipher(_) => "cipher",
            Self::Aborted(_) => "aborted",
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cipher(e) => write!(f, "{e}"),
            Self::Aborted(msg) => write!(f, "cipher task aborted: {msg}"),
        }
    }
}

fn validate(request: &ChunkRequest) -> Result<(), CipherError> {
    if request.key.len() != KEY_SIZE {
        return Err(CipherError::InvalidKeyLength(request.key.len()));
    }
    if request.iv.len() != IV_SIZE {
        return Err(CipherError::InvalidIvLength(request.iv.len()));
    }
    Ok(())
}

/// Run the cipher off the async executor; chunks can be megabytes.
async fn run_cipher(mode: CipherMode, request: ChunkRequest) -> Result<Vec<u8>, Failure> {
    let joined = tokio::task::spawn_blocking(move || match mode {
        CipherMode::Encrypt => fanout_crypto::encrypt(&request.data, &request.key, &request.iv),
        CipherMode::Decrypt => fanout_crypto::decrypt(&request.data, &request.key, &request.iv),
    })
    .await;

    match joined {
        Ok(result) => result.map_err(Failure::Cipher),
        Err(e) => Err(Failure::Aborted(e.to_string())),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[tonic::async_trait]
impl EncryptionService for EncryptionWorker {
    async fn encrypt_chunk(
        &self,
        request: tonic::Request<ChunkRequest>,
    ) -> Result<tonic::Response<ChunkResponse>, tonic::Status> {
        let response = self
            .process(CipherMode::Encrypt, request.into_inner())
            .await;
        Ok(tonic::Response::new(response))
    }

    async fn decrypt_chunk(
        &self,
        request: tonic::Request<ChunkRequest>,
    ) -> Result<tonic::Response<ChunkResponse>, tonic::Status> {
        let response = self
            .process(CipherMode::Decrypt, request.into_inner())
            .await;
        Ok(tonic::Response::new(response))
    }

    async fn test_connection(
        &self,
        request: tonic::Request<TestRequest>,
    ) -> Result<tonic::Response<TestResponse>, tonic::Status> {
        let remote = request.remote_addr();
        info!(
            worker_id = %self.worker_id,
            peer = ?remote,
            message = %request.get_ref().test_message,
            "test connection"
        );
        Ok(tonic::Response::new(TestResponse {
            alive: true,
            worker_id: self.worker_id.clone(),
            status: "ready".into(),
            timestamp: unix_now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::registry::Registry;

    fn worker() -> EncryptionWorker {
        EncryptionWorker::new("test-worker", WorkerMetrics::new(&mut Registry::default()))
    }

    fn request(data: &[u8], key_len: usize, iv_len: usize) -> ChunkRequest {
        ChunkRequest {
            data: data.to_vec(),
            chunk_id: 4,
            key: vec![0x5A; key_len],
            iv: vec![0xA5; iv_len],
        }
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_echoes_chunk_id() {
        let w = worker();
        let enc = w
            .process(CipherMode::Encrypt, request(b"chunk payload", 32, 16))
            .await;
        assert!(enc.success, "{}", enc.error_message);
        assert_eq!(enc.chunk_id, 4);
        assert_eq!(enc.processed_data.len(), 16);

        let mut dec_req = request(&enc.processed_data, 32, 16);
        dec_req.chunk_id = 9;
        let dec = w.process(CipherMode::Decrypt, dec_req).await;
        assert!(dec.success);
        assert_eq!(dec.chunk_id, 9);
        assert_eq!(dec.processed_data, b"chunk payload");
    }

    #[tokio::test]
    async fn bad_key_size_is_reported_not_raised() {
        let w = worker();
        let resp = w
            .process(CipherMode::Encrypt, request(b"data", 16, 16))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.chunk_id, 4);
        assert!(resp.processed_data.is_empty());
        assert!(resp.error_message.contains("key"), "{}", resp.error_message);
    }

    #[tokio::test]
    async fn misaligned_ciphertext_is_reported() {
        let w = worker();
        let resp = w
            .process(CipherMode::Decrypt, request(&[0u8; 17], 32, 16))
            .await;
        assert!(!resp.success);
        assert!(resp.error_message.contains("multiple of 16"), "{}", resp.error_message);
    }

    #[test]
    fn failures_are_classified_by_kind() {
        assert_eq!(
            Failure::Cipher(CipherError::InvalidKeyLength(16)).kind(),
            "invalid_argument"
        );
        assert_eq!(
            Failure::Cipher(CipherError::InvalidCiphertextLength(17)).kind(),
            "invalid_argument"
        );
        assert_eq!(Failure::Cipher(CipherError::Integrity).kind(), "integrity");
        assert_eq!(
            Failure::Cipher(CipherError::Entropy("no rng".into())).kind(),
            "cipher"
        );
        let aborted = Failure::Aborted("panicked".into());
        assert_eq!(aborted.kind(), "aborted");
        assert_eq!(aborted.to_string(), "cipher task aborted: panicked");
    }

    #[tokio::test]
    async fn metrics_track_outcomes() {
        let w = worker();
        w.process(CipherMode::Encrypt, request(b"x", 32, 16)).await;
        w.process(CipherMode::Decrypt, request(&[], 32, 16)).await;
        assert_eq!(w.metrics.count(CipherMode::Encrypt, true), 1);
        assert_eq!(w.metrics.count(CipherMode::Decrypt, false), 1);
    }

    #[tokio::test]
    async fn test_connection_reports_alive() {
        let w = worker();
        let resp = w
            .test_connection(tonic::Request::new(TestRequest {
                test_message: "ping".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.alive);
        assert_eq!(resp.worker_id, "test-worker");
        assert_eq!(resp.status, "ready");
        assert!(resp.timestamp > 0);
    }
}
