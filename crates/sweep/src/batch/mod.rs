//! Chunked execution of per-item operations with retry and backoff

mod executor;
mod retry;

pub use executor::{BatchExecutor, BatchResult, BatchRun, ItemOp, MAX_CHUNK_SIZE};
pub use retry::RetryPolicy;

pub(crate) use retry::random_u64;
