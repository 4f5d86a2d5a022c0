//! gRPC listener setup, plaintext or TLS

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, ServerTlsConfig};
use tracing::info;

use fanout_core::config::TlsConfig;
use fanout_core::{FanoutError, FanoutResult};

use crate::grpc::EncryptionWorker;

/// Bind `addr` and serve until the process is killed.
///
/// With `tls`, the certificate, key, and CA root are read before binding;
/// unreadable material fails startup with a configuration error.
pub async fn run_server(
    addr: &str,
    worker: EncryptionWorker,
    tls: Option<&TlsConfig>,
) -> FanoutResult<()> {
    let tls_config = tls.map(fanout_core::tls::server_tls_config).transpose()?;
    if tls_config.is_some() {
        info!("TLS material loaded");
    }

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| FanoutError::transport(addr, format!("bind failed: {e}")))?;

    serve_incoming(listener, worker, tls_config).await
}

/// Serve on an already-bound listener (tests bind `127.0.0.1:0`).
pub async fn serve_incoming(
    listener: TcpListener,
    worker: EncryptionWorker,
    tls: Option<ServerTlsConfig>,
) -> FanoutResult<()> {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let secure = tls.is_some();

    let mut builder = Server::builder();
    if let Some(cfg) = tls {
        builder = builder
            .tls_config(cfg)
            .map_err(|e| FanoutError::Configuration(format!("TLS setup failed: {e}")))?;
    }

    info!(
        addr = %local,
        worker_id = %worker.worker_id(),
        tls = secure,
        "worker server listening"
    );

    builder
        .add_service(worker.into_service())
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
        .map_err(|e| FanoutError::Other(anyhow::anyhow!("gRPC server error: {e}")))
}
