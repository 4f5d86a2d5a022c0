//! Integration tests: coordinator against stub workers that stall, lie about
//! chunk ids, reject calls with an error status, or report themselves not
//! alive.

use std::time::Duration;

use fanout_coordinator::{Coordinator, DispatchOptions};
use fanout_core::config::TlsConfig;
use fanout_core::proto::{
    encryption_service_server::{EncryptionService, EncryptionServiceServer},
    ChunkRequest, ChunkResponse, TestRequest, TestResponse,
};
use fanout_core::{CipherMode, FanoutError, Job, TransportMode, WorkerEndpoint};
use fanout_crypto::generate_key_iv;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

#[derive(Clone, Copy)]
enum Misbehaviour {
    Stall,
    WrongChunkId,
    Reject,
    NotAlive,
}

#[derive(Clone, Copy)]
struct StubWorker(Misbehaviour);

impl StubWorker {
    async fn reply(&self, req: ChunkRequest) -> Result<Response<ChunkResponse>, Status> {
        let chunk_id = match self.0 {
            Misbehaviour::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                req.chunk_id
            }
            Misbehaviour::WrongChunkId => req.chunk_id + 100,
            Misbehaviour::Reject => {
                return Err(Status::resource_exhausted("worker over capacity"));
            }
            Misbehaviour::NotAlive => req.chunk_id,
        };
        Ok(Response::new(ChunkResponse {
            processed_data: req.data,
            chunk_id,
            success: true,
            error_message: String::new(),
        }))
    }
}

#[tonic::async_trait]
impl EncryptionService for StubWorker {
    async fn encrypt_chunk(
        &self,
        request: Request<ChunkRequest>,
    ) -> Result<Response<ChunkResponse>, Status> {
        self.reply(request.into_inner()).await
    }

    async fn decrypt_chunk(
        &self,
        request: Request<ChunkRequest>,
    ) -> Result<Response<ChunkResponse>, Status> {
        self.reply(request.into_inner()).await
    }

    async fn test_connection(
        &self,
        _request: Request<TestRequest>,
    ) -> Result<Response<TestResponse>, Status> {
        let alive = !matches!(self.0, Misbehaviour::NotAlive);
        Ok(Response::new(TestResponse {
            alive,
            worker_id: "stub".into(),
            status: if alive { "ready" } else { "draining" }.into(),
            timestamp: 1,
        }))
    }
}

async fn spawn_stub(behaviour: Misbehaviour) -> WorkerEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(EncryptionServiceServer::new(StubWorker(behaviour)))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    WorkerEndpoint::new(addr.to_string(), TransportMode::Plaintext)
}

fn coordinator(endpoint: WorkerEndpoint, encrypt_timeout: Duration) -> Coordinator {
    let opts = DispatchOptions {
        chunk_size: 16,
        max_in_flight: 1,
        encrypt_timeout,
        health_timeout: Duration::from_secs(2),
        ..DispatchOptions::default()
    };
    Coordinator::new(vec![endpoint], &TlsConfig::default(), opts).unwrap()
}

fn small_job() -> Job {
    Job::new(fanout_chunks::split_bytes(&[0xAB; 40], 16).unwrap()).unwrap()
}

#[tokio::test]
async fn stalled_worker_hits_deadline() {
    let coord = coordinator(
        spawn_stub(Misbehaviour::Stall).await,
        Duration::from_millis(300),
    );
    let key = generate_key_iv().unwrap();

    let started = std::time::Instant::now();
    let err = coord
        .process(small_job(), CipherMode::Encrypt, &key)
        .await
        .unwrap_err();

    assert!(matches!(err, FanoutError::Transport { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn wrong_echoed_chunk_id_is_protocol_error() {
    let coord = coordinator(
        spawn_stub(Misbehaviour::WrongChunkId).await,
        Duration::from_secs(5),
    );
    let key = generate_key_iv().unwrap();

    let err = coord
        .process(small_job(), CipherMode::Encrypt, &key)
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::Protocol(_)), "{err}");
}

#[tokio::test]
async fn error_status_from_worker_is_grpc_error() {
    let coord = coordinator(spawn_stub(Misbehaviour::Reject).await, Duration::from_secs(5));
    let key = generate_key_iv().unwrap();

    let err = coord
        .process(small_job(), CipherMode::Encrypt, &key)
        .await
        .unwrap_err();
    match &err {
        FanoutError::Grpc(status) => {
            assert_eq!(status.code(), tonic::Code::ResourceExhausted);
            assert_eq!(status.message(), "worker over capacity");
        }
        other => panic!("expected Grpc, got {other}"),
    }
    assert!(err.is_chunk_failure());
}

#[tokio::test]
async fn worker_reporting_not_alive_fails_check() {
    let coord = coordinator(
        spawn_stub(Misbehaviour::NotAlive).await,
        Duration::from_secs(5),
    );

    assert!(!coord.test_connections().await);
    let report = coord.check_workers().await;
    assert!(!report[0].alive);
    assert_eq!(report[0].status.as_deref(), Some("draining"));
    assert!(report[0].error.is_none());
}
