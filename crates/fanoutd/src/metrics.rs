//! Prometheus /metrics + liveness HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  liveness probe, 200 while the process runs

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::sync::Arc;

use fanout_core::CipherMode;

type Labels = Vec<(String, String)>;

/// Per-chunk counters and latency histograms, labelled by operation
#[derive(Clone)]
pub struct WorkerMetrics {
    chunks: Family<Labels, Counter>,
    chunk_bytes: Family<Labels, Counter>,
    chunk_duration: Family<Labels, Histogram>,
}

impl WorkerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let chunks = Family::default();
        let chunk_bytes = Family::default();
        let chunk_duration = Family::<Labels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
        });

        registry.register(
            "fanout_worker_chunks",
            "Chunks processed, by operation and result",
            chunks.clone(),
        );
        registry.register(
            "fanout_worker_chunk_bytes",
            "Input bytes of successfully processed chunks",
            chunk_bytes.clone(),
        );
        registry.register(
            "fanout_worker_chunk_duration_seconds",
            "Cipher time per chunk in seconds",
            chunk_duration.clone(),
        );

        Self {
            chunks,
            chunk_bytes,
            chunk_duration,
        }
    }

    /// Record one finished chunk operation.
    pub fn observe(&self, mode: CipherMode, ok: bool, bytes: usize, elapsed_secs: f64) {
        let result = if ok { "ok" } else { "error" };
        let op = Self::op_labels(mode);
        let mut labels = op.clone();
        labels.push(("result".to_string(), result.to_string()));

        self.chunks.get_or_create(&labels).inc();
        self.chunk_duration.get_or_create(&op).observe(elapsed_secs);
        if ok {
            self.chunk_bytes.get_or_create(&op).inc_by(bytes as u64);
        }
    }

    /// Total chunks seen for `mode` with the given result.
    pub fn count(&self, mode: CipherMode, ok: bool) -> u64 {
        let mut labels = Self::op_labels(mode);
        labels.push((
            "result".to_string(),
            if ok { "ok" } else { "error" }.to_string(),
        ));
        self.chunks.get_or_create(&labels).get()
    }

    fn op_labels(mode: CipherMode) -> Labels {
        vec![("op".to_string(), mode.as_str().to_string())]
    }
}

/// Serve Prometheus metrics and the liveness endpoint on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, registry: Arc<Registry>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
