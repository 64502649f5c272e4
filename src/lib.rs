// Public library interface for SpaceSaver-rs
// The CLI and the validation tool both drive the engine through this crate.

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod scanner;

pub use cache::SizeCache;
pub use config::EngineConfig;
pub use error::EngineError;
pub use format::{format_size, format_size_with, parse_size};
pub use scanner::cancel::CancelToken;
pub use scanner::types::{AnalysisResult, ChildSize, ProgressEvent, ProgressSink, ScanStats};
pub use scanner::Engine;
