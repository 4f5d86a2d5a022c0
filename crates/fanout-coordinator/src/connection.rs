//! Per-worker gRPC channel
//!
//! Channels are created lazily: building a handle never touches the network,
//! the first RPC dials. A worker that is down therefore only surfaces as a
//! transport error on the call that needs it.

use std::time::Duration;

use fanout_core::config::TlsConfig;
use fanout_core::proto::{
    encryption_service_client::EncryptionServiceClient, ChunkRequest, ChunkResponse, TestRequest,
    TestResponse,
};
use fanout_core::{CipherMode, FanoutError, FanoutResult, TransportMode, WorkerEndpoint, MAX_MESSAGE_SIZE};
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

/// A configured, not necessarily connected, worker.
#[derive(Clone)]
pub struct WorkerHandle {
    endpoint: WorkerEndpoint,
    client: EncryptionServiceClient<Channel>,
}

impl WorkerHandle {
    /// Build a lazy channel to `endpoint`.
    ///
    /// Secured endpoints read the CA root from `tls` now, so missing material
    /// fails construction rather than the first call. Must run inside a tokio
    /// runtime.
    pub fn connect_lazy(
        endpoint: WorkerEndpoint,
        tls: &TlsConfig,
        connect_timeout: Duration,
    ) -> FanoutResult<Self> {
        let uri = endpoint.uri();
        let mut builder = Endpoint::from_shared(uri.clone())
            .map_err(|e| FanoutError::Configuration(format!("invalid worker address {uri}: {e}")))?
            .connect_timeout(connect_timeout);

        if endpoint.transport == TransportMode::Secured {
            let client_tls = fanout_core::tls::client_tls_config(tls, endpoint.host())?;
            builder = builder
                .tls_config(client_tls)
                .map_err(|e| FanoutError::Configuration(format!("TLS setup for {uri}: {e}")))?;
        }

        let client = EncryptionServiceClient::new(builder.connect_lazy())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);

        tracing::debug!(worker = %endpoint, "worker channel configured");
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    /// Send one chunk and wait at most `deadline` for the reply.
    ///
    /// Channel failures and deadline expiry map to [`FanoutError::Transport`];
    /// any other non-OK status the worker sends back is [`FanoutError::Grpc`].
    /// A completed reply is returned as-is, including `success = false`.
    pub async fn call_chunk(
        &self,
        mode: CipherMode,
        request: ChunkRequest,
        deadline: Duration,
    ) -> FanoutResult<ChunkResponse> {
        let mut req = tonic::Request::new(request);
        req.set_timeout(deadline);

        // tonic clients take &mut self; clones share the underlying channel
        let mut client = self.client.clone();
        let call = async move {
            match mode {
                CipherMode::Encrypt => client.encrypt_chunk(req).await,
                CipherMode::Decrypt => client.decrypt_chunk(req).await,
            }
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(self.status_error(status)),
            Err(_) => Err(FanoutError::transport(
                self.endpoint.to_string(),
                format!("deadline of {}ms exceeded", deadline.as_millis()),
            )),
        }
    }

    /// Liveness probe.
    pub async fn ping(&self, message: &str, deadline: Duration) -> FanoutResult<TestResponse> {
        let mut req = tonic::Request::new(TestRequest {
            test_message: message.to_string(),
        });
        req.set_timeout(deadline);

        let mut client = self.client.clone();
        match tokio::time::timeout(deadline, client.test_connection(req)).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(self.status_error(status)),
            Err(_) => Err(FanoutError::transport(
                self.endpoint.to_string(),
                "health check deadline exceeded",
            )),
        }
    }

    fn status_error(&self, status: tonic::Status) -> FanoutError {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Unknown => {
                FanoutError::transport(
                    self.endpoint.to_string(),
                    format!("{:?}: {}", status.code(), status.message()),
                )
            }
            code => {
                tracing::debug!(worker = %self.endpoint, ?code, "worker answered with an error status");
                FanoutError::Grpc(status)
            }
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
