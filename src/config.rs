use crate::error::{EngineError, Result};

/// Entries per batch for the immediate subdirectories of the analysis root.
pub const DEFAULT_ROOT_BATCH: usize = 10;
/// Entries per batch below the root.
pub const DEFAULT_INNER_BATCH: usize = 100;

/// Configuration for the aggregation engine.
///
/// Only traversal settings live here. How sizes are rendered (unit factor,
/// minimum share for a separate row) is up to the presentation layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root-level subdirectories per batch. Progress events and cancellation
    /// checks happen once per batch.
    pub root_batch_size: usize,
    /// Chunk size for entries inside nested directories (cancellation only)
    pub inner_batch_size: usize,
    /// Worker threads for root-level subtrees (1 = scan on the caller's thread)
    pub threads: usize,
    /// Stack size per worker. Recursion depth follows directory depth.
    pub worker_stack_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            root_batch_size: DEFAULT_ROOT_BATCH,
            inner_batch_size: DEFAULT_INNER_BATCH,
            threads,
            worker_stack_bytes: 8 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Single-threaded configuration, useful for deterministic progress order.
    pub fn sequential() -> Self {
        Self {
            threads: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_batch_size == 0 || self.inner_batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch sizes must be at least 1".into(),
            ));
        }
        if self.threads == 0 {
            return Err(EngineError::InvalidArgument(
                "thread count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
