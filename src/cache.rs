use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;

/// A cached aggregate size, valid only while the directory's modification
/// time still equals `mtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRecord {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Directory sizes keyed by path, invalidated lazily by modification time.
///
/// Safe to share between the workers of one engine: the map is sharded, so a
/// lookup only contends with stores that hash to the same shard. Two workers
/// storing the same path is harmless because every store re-reads the mtime
/// it records.
///
/// The engine stores through [`SizeCache::store_if_unchanged`]: a directory
/// whose entries changed while it was being summed keeps no record.
#[derive(Debug, Default)]
pub struct SizeCache {
    records: DashMap<PathBuf, CacheRecord>,
}

impl SizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached size of `path`, or `None` if there is no record, the record is
    /// stale, or the directory's mtime cannot be read right now.
    pub fn lookup(&self, path: &Path) -> Option<u64> {
        self.lookup_at(path, current_mtime(path)?)
    }

    /// Cached size of `path` if its record was taken at `mtime`.
    pub fn lookup_at(&self, path: &Path, mtime: SystemTime) -> Option<u64> {
        let record = self.records.get(path)?;
        (record.mtime == mtime).then_some(record.size)
    }

    /// Record `size` for `path` against its current mtime.
    ///
    /// No-op if the mtime cannot be read (the directory vanished or became
    /// unreadable after it was summed).
    pub fn store(&self, path: &Path, size: u64) {
        let Some(mtime) = current_mtime(path) else {
            tracing::debug!("Not caching {}: mtime unavailable", path.display());
            return;
        };
        self.records.insert(path.to_path_buf(), CacheRecord { size, mtime });
    }

    /// Record `size` for `path` only if its mtime still equals `observed`,
    /// the value read before the directory was listed. Returns whether the
    /// record was written.
    pub fn store_if_unchanged(&self, path: &Path, size: u64, observed: SystemTime) -> bool {
        match current_mtime(path) {
            Some(mtime) if mtime == observed => {
                self.records.insert(path.to_path_buf(), CacheRecord { size, mtime });
                true
            }
            Some(_) => {
                tracing::debug!("Not caching {}: changed during scan", path.display());
                false
            }
            None => {
                tracing::debug!("Not caching {}: mtime unavailable", path.display());
                false
            }
        }
    }

    /// The raw record for `path`, without checking freshness.
    pub fn record(&self, path: &Path) -> Option<CacheRecord> {
        self.records.get(path).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

fn current_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
