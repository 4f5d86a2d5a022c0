//! Job orchestration: health checks, chunk dispatch, output
//!
//! Channels are built once in [`Coordinator::new`] and reused for every job.
//! A failed channel is never re-established; build a new coordinator to retry.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};

use fanout_core::config::{CoordinatorConfig, FanoutConfig, TlsConfig};
use fanout_core::proto::ChunkRequest;
use fanout_core::{CipherMode, Chunk, FanoutError, FanoutResult, Job, WorkerEndpoint};
use fanout_crypto::KeyMaterial;

use crate::assign::{AssignmentStrategy, RoundRobin};
use crate::connection::WorkerHandle;
use crate::output::DurableWriter;

/// Called after each completed chunk with `(done, total)`
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Dispatch tuning, usually taken from `[coordinator]` config
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Plaintext chunk size before any legacy adjustment
    pub chunk_size: usize,
    pub legacy_block_adjust: bool,
    /// Concurrent RPCs per job; 1 dispatches sequentially
    pub max_in_flight: usize,
    pub encrypt_timeout: Duration,
    pub decrypt_timeout: Duration,
    pub health_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for DispatchOptions {
    fn from(cfg: &CoordinatorConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            legacy_block_adjust: cfg.legacy_block_adjust,
            max_in_flight: cfg.max_in_flight,
            encrypt_timeout: cfg.encrypt_timeout(),
            decrypt_timeout: cfg.decrypt_timeout(),
            health_timeout: cfg.health_timeout(),
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

impl DispatchOptions {
    pub fn deadline(&self, mode: CipherMode) -> Duration {
        match mode {
            CipherMode::Encrypt => self.encrypt_timeout,
            CipherMode::Decrypt => self.decrypt_timeout,
        }
    }

    /// Plaintext bytes per chunk after the legacy adjustment.
    pub fn plaintext_chunk_size(&self) -> usize {
        fanout_chunks::effective_chunk_size(self.chunk_size, self.legacy_block_adjust)
    }

    /// Ciphertext bytes per chunk; decrypt jobs split at this size.
    ///
    /// Fails for chunk sizes whose padded length does not fit a `usize`.
    pub fn ciphertext_chunk_size(&self) -> FanoutResult<usize> {
        fanout_crypto::ciphertext_chunk_size(self.plaintext_chunk_size()).ok_or_else(|| {
            FanoutError::Configuration(format!(
                "chunk_size {} is too large to encrypt",
                self.chunk_size
            ))
        })
    }
}

/// Outcome of one liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHealth {
    pub endpoint: String,
    pub alive: bool,
    pub worker_id: Option<String>,
    pub status: Option<String>,
    pub timestamp: Option<i64>,
    pub error: Option<String>,
}

/// What a file job did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub mode: CipherMode,
    pub chunks: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed: Duration,
}

pub struct Coordinator {
    workers: Vec<WorkerHandle>,
    strategy: Arc<dyn AssignmentStrategy>,
    writer: DurableWriter,
    options: DispatchOptions,
    progress: Option<ProgressFn>,
}

impl Coordinator {
    /// Configure one lazy channel per endpoint. No worker is contacted.
    ///
    /// Fails with a configuration error when the list is empty or TLS
    /// material for a secured endpoint cannot be read.
    pub fn new(
        endpoints: Vec<WorkerEndpoint>,
        tls: &TlsConfig,
        options: DispatchOptions,
    ) -> FanoutResult<Self> {
        if endpoints.is_empty() {
            return Err(FanoutError::Configuration(
                "at least one worker endpoint is required".into(),
            ));
        }
        if options.chunk_size == 0 {
            return Err(FanoutError::Configuration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        options.ciphertext_chunk_size()?;

        let workers = endpoints
            .into_iter()
            .map(|ep| WorkerHandle::connect_lazy(ep, tls, options.connect_timeout))
            .collect::<FanoutResult<Vec<_>>>()?;

        info!(
            workers = workers.len(),
            max_in_flight = options.max_in_flight,
            chunk_size = options.chunk_size,
            "coordinator configured"
        );
        Ok(Self {
            workers,
            strategy: Arc::new(RoundRobin),
            writer: DurableWriter::default(),
            options,
            progress: None,
        })
    }

    /// Build from a loaded config file: `[coordinator]` workers and tuning,
    /// `[tls]` for the transport mode.
    pub fn from_config(config: &FanoutConfig) -> FanoutResult<Self> {
        let endpoints = config.coordinator.endpoints(config.tls.transport());
        Self::new(
            endpoints,
            &config.tls,
            DispatchOptions::from(&config.coordinator),
        )
    }

    pub fn with_strategy(mut self, strategy: impl AssignmentStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn with_writer(mut self, writer: DurableWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Probe every worker concurrently and report each result.
    pub async fn check_workers(&self) -> Vec<WorkerHealth> {
        let deadline = self.options.health_timeout;
        let probes = self.workers.iter().map(|worker| async move {
            let endpoint = worker.endpoint().to_string();
            match worker.ping("ping", deadline).await {
                Ok(resp) => WorkerHealth {
                    endpoint,
                    alive: resp.alive,
                    worker_id: Some(resp.worker_id),
                    status: Some(resp.status),
                    timestamp: Some(resp.timestamp),
                    error: None,
                },
                Err(e) => WorkerHealth {
                    endpoint,
                    alive: false,
                    worker_id: None,
                    status: None,
                    timestamp: None,
                    error: Some(e.to_string()),
                },
            }
        });
        futures::future::join_all(probes).await
    }

    /// True only if every configured worker answered alive in time.
    pub async fn test_connections(&self) -> bool {
        let report = self.check_workers().await;
        let mut all_alive = true;
        for health in &report {
            if health.alive {
                info!(
                    worker = %health.endpoint,
                    worker_id = health.worker_id.as_deref().unwrap_or(""),
                    status = health.status.as_deref().unwrap_or(""),
                    "worker alive"
                );
            } else {
                all_alive = false;
                warn!(
                    worker = %health.endpoint,
                    error = health.error.as_deref().unwrap_or("reported not alive"),
                    "worker unavailable"
                );
            }
        }
        all_alive
    }

    /// Run every chunk of `job` through a worker and return the results in
    /// id order.
    ///
    /// The first failed chunk (transport error, deadline, or a worker
    /// reporting `success = false`) fails the whole job. In-flight calls are
    /// dropped and no other worker is tried.
    pub async fn process(
        &self,
        job: Job,
        mode: CipherMode,
        key: &KeyMaterial,
    ) -> FanoutResult<Vec<Chunk>> {
        if job.is_empty() {
            return Err(FanoutError::EmptyJob);
        }

        let total = job.len();
        let deadline = self.options.deadline(mode);
        let in_flight = self.options.max_in_flight.max(1);
        let started = Instant::now();
        info!(op = %mode, chunks = total, in_flight, "dispatching job");

        let mut done = 0usize;
        let results: Vec<Chunk> = stream::iter(job.into_chunks())
            .map(|chunk| self.dispatch(chunk, mode, key, deadline))
            .buffer_unordered(in_flight)
            .inspect_ok(|_| {
                done += 1;
                if let Some(progress) = &self.progress {
                    progress(done, total);
                }
            })
            .try_collect()
            .await
            .inspect_err(|e| error!(op = %mode, error = %e, "job aborted"))?;

        let ordered = place_by_id(results, total)?;
        info!(
            op = %mode,
            chunks = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job processed"
        );
        Ok(ordered)
    }

    async fn dispatch(
        &self,
        chunk: Chunk,
        mode: CipherMode,
        key: &KeyMaterial,
        deadline: Duration,
    ) -> FanoutResult<Chunk> {
        let index = self.strategy.assign(chunk.id, self.workers.len());
        let worker = self.workers.get(index).ok_or_else(|| {
            FanoutError::Configuration(format!(
                "assignment picked worker {index} of {}",
                self.workers.len()
            ))
        })?;

        let chunk_id = chunk.id;
        let wire_id = chunk.wire_id()?;
        let bytes_in = chunk.len();
        let request = ChunkRequest {
            data: chunk.data,
            chunk_id: wire_id,
            key: key.key().to_vec(),
            iv: key.iv().to_vec(),
        };

        let started = Instant::now();
        let response = worker.call_chunk(mode, request, deadline).await?;

        if !response.success {
            return Err(FanoutError::WorkerReported {
                chunk_id,
                worker: worker.endpoint().to_string(),
                message: response.error_message,
            });
        }
        if response.chunk_id != wire_id {
            return Err(FanoutError::Protocol(format!(
                "worker {} answered chunk {} for request {chunk_id}",
                worker.endpoint(),
                response.chunk_id
            )));
        }

        debug!(
            chunk_id,
            worker = %worker.endpoint(),
            op = %mode,
            bytes_in,
            bytes_out = response.processed_data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chunk done"
        );
        Ok(Chunk::new(chunk_id, response.processed_data))
    }

    /// Durably write processed chunks to `path`; see [`DurableWriter::write`].
    pub fn write_output(&self, path: &Path, chunks: &[Chunk]) -> FanoutResult<u64> {
        self.writer.write(path, chunks)
    }

    /// Split `input`, encrypt every chunk, write the ciphertext to `output`.
    pub async fn encrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
    ) -> FanoutResult<JobSummary> {
        let chunks = fanout_chunks::split(input, self.options.plaintext_chunk_size())?;
        self.run_file(CipherMode::Encrypt, chunks, output, key).await
    }

    /// Split `input` at the ciphertext chunk size, decrypt, write plaintext.
    ///
    /// The chunk size settings must match the ones used to encrypt.
    pub async fn decrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
    ) -> FanoutResult<JobSummary> {
        let chunks = fanout_chunks::split(input, self.options.ciphertext_chunk_size()?)?;
        self.run_file(CipherMode::Decrypt, chunks, output, key).await
    }

    async fn run_file(
        &self,
        mode: CipherMode,
        chunks: Vec<Chunk>,
        output: &Path,
        key: &KeyMaterial,
    ) -> FanoutResult<JobSummary> {
        let started = Instant::now();
        let job = Job::new(chunks)?;
        let count = job.len();
        let bytes_in = job.total_bytes();

        let processed = self.process(job, mode, key).await?;
        let bytes_out = self.write_output(output, &processed)?;

        Ok(JobSummary {
            mode,
            chunks: count,
            bytes_in,
            bytes_out,
            elapsed: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.workers)
            .field("writer", &self.writer)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Put results into their id slots; every slot must be filled exactly once.
fn place_by_id(results: Vec<Chunk>, total: usize) -> FanoutResult<Vec<Chunk>> {
    let mut slots: Vec<Option<Chunk>> = vec![None; total];
    for chunk in results {
        let id = chunk.id;
        let Some(slot) = slots.get_mut(id as usize) else {
            return Err(FanoutError::Protocol(format!(
                "chunk {id} outside job of {total} chunks"
            )));
        };
        if slot.replace(chunk).is_some() {
            return Err(FanoutError::Protocol(format!("chunk {id} returned twice")));
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.ok_or_else(|| FanoutError::Protocol(format!("chunk {id} missing from results")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::TransportMode;

    fn endpoints(n: usize) -> Vec<WorkerEndpoint> {
        (0..n)
            .map(|i| WorkerEndpoint::new(format!("127.0.0.1:{}", 1 + i), TransportMode::Plaintext))
            .collect()
    }

    #[tokio::test]
    async fn empty_endpoint_list_rejected() {
        let err = Coordinator::new(Vec::new(), &TlsConfig::default(), DispatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)), "{err}");
    }

    #[tokio::test]
    async fn zero_chunk_size_rejected() {
        let options = DispatchOptions {
            chunk_size: 0,
            ..DispatchOptions::default()
        };
        let err = Coordinator::new(endpoints(1), &TlsConfig::default(), options).unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)));
    }

    #[tokio::test]
    async fn unrepresentable_chunk_size_rejected() {
        let options = DispatchOptions {
            chunk_size: usize::MAX,
            ..DispatchOptions::default()
        };
        let err = Coordinator::new(endpoints(1), &TlsConfig::default(), options).unwrap_err();
        assert!(matches!(err, FanoutError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[tokio::test]
    async fn chunk_size_beyond_any_file_is_accepted() {
        let options = DispatchOptions {
            chunk_size: 1usize << 46,
            ..DispatchOptions::default()
        };
        let coord = Coordinator::new(endpoints(1), &TlsConfig::default(), options).unwrap();
        assert_eq!(
            coord.options().ciphertext_chunk_size().unwrap(),
            (1usize << 46) + 16
        );
    }

    #[tokio::test]
    async fn construction_with_dead_workers_succeeds() {
        let coord =
            Coordinator::new(endpoints(3), &TlsConfig::default(), DispatchOptions::default())
                .unwrap();
        assert_eq!(coord.workers().len(), 3);
    }

    #[tokio::test]
    async fn empty_job_is_rejected_without_dispatch() {
        let coord =
            Coordinator::new(endpoints(1), &TlsConfig::default(), DispatchOptions::default())
                .unwrap();
        let key = KeyMaterial::from_parts([0u8; 32], [0u8; 16]);
        let err = coord
            .process(Job::default(), CipherMode::Encrypt, &key)
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::EmptyJob));
    }

    #[test]
    fn deadlines_follow_mode() {
        let opts = DispatchOptions::default();
        assert_eq!(opts.deadline(CipherMode::Encrypt), Duration::from_secs(30));
        assert_eq!(opts.deadline(CipherMode::Decrypt), Duration::from_secs(10));
    }

    #[test]
    fn ciphertext_chunk_size_tracks_legacy_flag() {
        let mut opts = DispatchOptions {
            chunk_size: 64,
            ..DispatchOptions::default()
        };
        assert_eq!(opts.plaintext_chunk_size(), 64);
        assert_eq!(opts.ciphertext_chunk_size().unwrap(), 80);

        opts.legacy_block_adjust = true;
        assert_eq!(opts.plaintext_chunk_size(), 48);
        assert_eq!(opts.ciphertext_chunk_size().unwrap(), 64);
    }

    #[test]
    fn placement_is_by_id_not_arrival() {
        let results = vec![
            Chunk::new(2, vec![2]),
            Chunk::new(0, vec![0]),
            Chunk::new(1, vec![1]),
        ];
        let ordered = place_by_id(results, 3).unwrap();
        assert_eq!(ordered.iter().map(|c| c.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn placement_rejects_duplicates_gaps_and_strays() {
        let dup = vec![Chunk::new(0, vec![]), Chunk::new(0, vec![])];
        assert!(matches!(place_by_id(dup, 2), Err(FanoutError::Protocol(_))));

        let gap = vec![Chunk::new(0, vec![])];
        assert!(matches!(place_by_id(gap, 2), Err(FanoutError::Protocol(_))));

        let stray = vec![Chunk::new(5, vec![])];
        assert!(matches!(place_by_id(stray, 1), Err(FanoutError::Protocol(_))));
    }
}
