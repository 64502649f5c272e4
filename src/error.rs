use std::path::PathBuf;

/// Failures that `Engine::analyze` and the size formatting helpers surface.
///
/// Per-entry filesystem problems (permission denied, entries vanishing
/// mid-scan) never show up here. They are absorbed into the size computation
/// as zero contribution and counted in `ScanStats::skipped`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("scan cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether the caller asked for this outcome, as opposed to a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
