use std::fs::{self, DirEntry, Metadata, ReadDir};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::cancel::CancelToken;
use super::types::{EntryKind, ScanStats};
use crate::cache::SizeCache;
use crate::error::Result;

/// The directory-level filesystem calls a scan makes.
///
/// Tests swap these out to make chosen paths fail the way a protected
/// directory would, whatever user the tests run as.
#[derive(Clone, Copy)]
pub(crate) struct FsOps {
    pub metadata: fn(&Path) -> io::Result<Metadata>,
    pub read_dir: fn(&Path) -> io::Result<ReadDir>,
}

impl Default for FsOps {
    fn default() -> Self {
        Self {
            metadata: |path: &Path| fs::metadata(path),
            read_dir: |path: &Path| fs::read_dir(path),
        }
    }
}

impl FsOps {
    /// Directory mtime as seen before listing it.
    pub fn mtime(&self, path: &Path) -> Option<SystemTime> {
        (self.metadata)(path).and_then(|m| m.modified()).ok()
    }
}

/// Shared counters, bumped from every worker of one scan.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    dirs_enumerated: AtomicU64,
    files_sized: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    skipped: AtomicU64,
}

impl StatsCollector {
    pub fn dir_enumerated(&self) {
        self.dirs_enumerated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_sized(&self) {
        self.files_sized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScanStats {
        ScanStats {
            dirs_enumerated: self.dirs_enumerated.load(Ordering::Relaxed),
            files_sized: self.files_sized.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Recursive, cache-aware size computation for one scan.
///
/// Holds only shared references, so one walker can be used from every
/// worker of the pool at once.
pub(crate) struct Walker<'a> {
    pub cache: &'a SizeCache,
    pub cancel: Option<&'a CancelToken>,
    pub stats: &'a StatsCollector,
    pub batch_size: usize,
    pub fs: FsOps,
}

impl Walker<'_> {
    /// Aggregate size of the directory at `path`.
    ///
    /// Served from the cache when the directory is unchanged. Otherwise the
    /// directory is walked and, if the walk finished and the directory did
    /// not change meanwhile, the result is cached. Unreadable directories
    /// count as 0 and are not cached. The only error is `Cancelled`, in which
    /// case nothing below `path` that was still in progress gets cached.
    pub fn dir_size(&self, path: &Path) -> Result<u64> {
        let observed = self.fs.mtime(path);
        if let Some(size) = observed.and_then(|mtime| self.cache.lookup_at(path, mtime)) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Cache hit: {} ({} bytes)", path.display(), size);
            return Ok(size);
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let Some(entries) = self.list(path) else {
            return Ok(0);
        };

        let mut total: u64 = 0;
        for batch in entries.chunks(self.batch_size) {
            self.check_cancel()?;
            for entry in batch {
                let size = match self.classify(entry) {
                    EntryKind::File { size } => size,
                    EntryKind::Directory => self.dir_size(&entry.path())?,
                    EntryKind::Other | EntryKind::Inaccessible => 0,
                };
                total = total.saturating_add(size);
            }
        }

        self.commit(path, total, observed);
        Ok(total)
    }

    /// Cache `total` for `path` if its mtime is still the one read before
    /// listing it.
    pub fn commit(&self, path: &Path, total: u64, observed: Option<SystemTime>) {
        match observed {
            Some(mtime) => {
                self.cache.store_if_unchanged(path, total, mtime);
            }
            None => tracing::debug!("Not caching {}: mtime unavailable", path.display()),
        }
    }

    /// All readable entries of `path`, or `None` if it cannot be listed.
    pub fn list(&self, path: &Path) -> Option<Vec<DirEntry>> {
        let read_dir = match (self.fs.read_dir)(path) {
            Ok(rd) => rd,
            Err(e) => {
                self.skip(path, &e);
                return None;
            }
        };
        self.stats.dir_enumerated();

        let entries = read_dir
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    self.skip(path, &e);
                    None
                }
            })
            .collect();
        Some(entries)
    }

    /// Determine the entry's kind without following symlinks, reading the
    /// size of regular files on the way.
    pub fn classify(&self, entry: &DirEntry) -> EntryKind {
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                self.skip(&entry.path(), &e);
                return EntryKind::Inaccessible;
            }
        };

        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(meta) => {
                    self.stats.file_sized();
                    EntryKind::File { size: meta.len() }
                }
                // Deleted or locked between listing and stat
                Err(e) => {
                    self.skip(&entry.path(), &e);
                    EntryKind::Inaccessible
                }
            }
        } else {
            EntryKind::Other
        }
    }

    pub fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    fn skip(&self, path: &Path, err: &io::Error) {
        self.stats.skipped();
        tracing::debug!("Skipping {}: {}", path.display(), err);
    }
}
