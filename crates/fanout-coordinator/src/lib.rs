//! fanout-coordinator: drives a chunked cipher job across workers
//!
//! Pipeline:
//! ```text
//! split file → Job → per-chunk RPC (worker = assign(chunk_id)) → place by id → durable write
//! ```
//! Any failed chunk aborts the whole job; nothing is written and no other
//! worker is retried.

pub mod assign;
pub mod connection;
pub mod coordinator;
pub mod output;

pub use assign::{AssignmentStrategy, RoundRobin};
pub use connection::WorkerHandle;
pub use coordinator::{Coordinator, DispatchOptions, JobSummary, ProgressFn, WorkerHealth};
pub use output::{AtomicFileSink, DirectFileSink, DurableWriter, OutputSink, ReassembleSink};
