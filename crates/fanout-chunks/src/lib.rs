//! fanout-chunks: fixed-size chunking and ordered reassembly
//!
//! # Overview
//! - `fixed`: split a file (or byte slice) into id-tagged chunks of a fixed size
//! - `reassemble`: write chunks back to a file in ascending id order

pub mod fixed;
pub mod reassemble;

pub use fixed::{effective_chunk_size, split, split_bytes};
pub use reassemble::reassemble;
