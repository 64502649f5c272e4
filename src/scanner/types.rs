use std::path::PathBuf;
use std::sync::mpsc;

use chrono::{DateTime, Local};
use compact_str::CompactString;

/// What a directory entry turned out to be when the walker looked at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with its size in bytes
    File { size: u64 },
    /// Directory; its size is computed, never read
    Directory,
    /// Symlinks, sockets, devices, fifos. Contribute 0.
    Other,
    /// Type or metadata could not be read (permission denied, vanished)
    Inaccessible,
}

/// Progress update emitted after each batch of root-level subdirectories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Root-level subdirectories finished so far
    pub processed: usize,
    /// Root-level subdirectories in total
    pub total: usize,
    /// Name of the last subdirectory in the batch
    pub current: CompactString,
}

impl ProgressEvent {
    /// Completion in percent (100 when there is nothing to do).
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Receives progress events. Called from the thread that runs `analyze`.
pub trait ProgressSink: Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forward events to another thread, e.g. a UI loop polling with `try_recv`.
impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn report(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is watching anymore
        let _ = self.send(event.clone());
    }
}

/// Aggregate size of one immediate subdirectory of the analysis root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSize {
    pub name: CompactString,
    pub size: u64,
}

/// Counters for a single `analyze` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Directories whose entries were listed
    pub dirs_enumerated: u64,
    /// Regular files whose size was read
    pub files_sized: u64,
    /// Directories served from the size cache
    pub cache_hits: u64,
    /// Directories that had to be walked
    pub cache_misses: u64,
    /// Entries that contributed 0 because they could not be read
    pub skipped: u64,
}

/// Outcome of analyzing one root path.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub root: PathBuf,
    /// Sum of all regular files below `root`, including its own files
    pub total: u64,
    /// Immediate subdirectories with a non-zero size, largest first
    pub children: Vec<ChildSize>,
    pub completed_at: DateTime<Local>,
    pub stats: ScanStats,
}

impl AnalysisResult {
    /// Display name of the root: its last component, or the whole path for `/`.
    pub fn root_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.to_string_lossy().to_string())
    }

    /// Percentage of the total taken by `child`.
    pub fn share(&self, child: &ChildSize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            child.size as f64 * 100.0 / self.total as f64
        }
    }

    /// Children taking at least `min_percent` of the total.
    pub fn children_above(&self, min_percent: f64) -> impl Iterator<Item = &ChildSize> + '_ {
        self.children
            .iter()
            .filter(move |c| self.share(c) >= min_percent)
    }

    /// Bytes in `root` not attributed to any listed child (loose files).
    pub fn unlisted(&self) -> u64 {
        let listed: u64 = self.children.iter().map(|c| c.size).sum();
        self.total.saturating_sub(listed)
    }
}

/// Sort a breakdown by size (descending), ties by name.
pub(crate) fn sort_children_by_size(children: &mut [ChildSize]) {
    children.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));
}
