pub mod cancel;
pub mod types;
mod walk;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use compact_str::CompactString;
use rayon::prelude::*;

use self::cancel::CancelToken;
use self::types::{
    sort_children_by_size, AnalysisResult, ChildSize, EntryKind, ProgressEvent, ProgressSink,
};
use self::walk::{FsOps, StatsCollector, Walker};
use crate::cache::SizeCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Directory size aggregation engine.
///
/// Owns its `SizeCache` for its whole lifetime: a second `analyze` of an
/// unchanged tree only lists the root and checks the mtime of each immediate
/// subdirectory. Root-level subtrees are summed on a private rayon pool when
/// `config.threads > 1`.
pub struct Engine {
    config: EngineConfig,
    cache: SizeCache,
    pool: Option<rayon::ThreadPool>,
    fs: FsOps,
}

/// Immediate subdirectory of the analysis root, waiting to be summed.
struct RootDir {
    name: CompactString,
    path: PathBuf,
}

impl Engine {
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = if config.threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .stack_size(config.worker_stack_bytes)
                .thread_name(|i| format!("scan-worker-{i}"))
                .build()?;
            Some(pool)
        } else {
            None
        };
        tracing::debug!("Engine created with {} worker(s)", config.threads);
        Ok(Self {
            config,
            cache: SizeCache::new(),
            pool,
            fs: FsOps::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &SizeCache {
        &self.cache
    }

    /// Compute the aggregate size of `root` and the sizes of its immediate
    /// subdirectories.
    ///
    /// Fails with `NotFound` if `root` does not exist and with `Cancelled` if
    /// `cancel` fires before the scan finished. Every other filesystem
    /// problem counts as 0 bytes for the affected entry. A root that is a
    /// file yields that file's size with an empty breakdown.
    pub fn analyze(
        &self,
        root: impl AsRef<Path>,
        progress: Option<&dyn ProgressSink>,
        cancel: Option<&CancelToken>,
    ) -> Result<AnalysisResult> {
        let root = root.as_ref();
        let start = Instant::now();
        let stats = StatsCollector::default();
        let walker = Walker {
            cache: &self.cache,
            cancel,
            stats: &stats,
            batch_size: self.config.inner_batch_size,
            fs: self.fs,
        };

        let meta = match (self.fs.metadata)(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(root.to_path_buf()));
            }
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}; reporting 0 bytes", root.display(), e);
                stats.skipped();
                return Ok(finish(root, 0, Vec::new(), &stats));
            }
        };
        walker.check_cancel()?;

        if !meta.is_dir() {
            stats.file_sized();
            return Ok(finish(root, meta.len(), Vec::new(), &stats));
        }

        tracing::info!("Analyzing {}", root.display());
        // Read before listing so a change made during the scan is never
        // cached under the new mtime
        let observed = meta.modified().ok();

        let Some(entries) = walker.list(root) else {
            tracing::warn!("Cannot list {}; reporting 0 bytes", root.display());
            return Ok(finish(root, 0, Vec::new(), &stats));
        };

        let mut total: u64 = 0;
        let mut dirs: Vec<RootDir> = Vec::new();
        for entry in &entries {
            match walker.classify(entry) {
                EntryKind::File { size } => total = total.saturating_add(size),
                EntryKind::Directory => dirs.push(RootDir {
                    name: CompactString::new(entry.file_name().to_string_lossy()),
                    path: entry.path(),
                }),
                EntryKind::Other | EntryKind::Inaccessible => {}
            }
        }
        // Stable batches make progress reports reproducible between runs
        dirs.sort_by(|a, b| a.name.cmp(&b.name));

        let dir_count = dirs.len();
        let mut children = Vec::with_capacity(dir_count);
        let mut processed = 0;

        for batch in dirs.chunks(self.config.root_batch_size) {
            walker.check_cancel()?;

            let sizes = self.sum_batch(&walker, batch)?;
            for (dir, size) in batch.iter().zip(sizes) {
                total = total.saturating_add(size);
                if size > 0 {
                    children.push(ChildSize {
                        name: dir.name.clone(),
                        size,
                    });
                }
            }

            processed += batch.len();
            if let (Some(sink), Some(last)) = (progress, batch.last()) {
                sink.report(&ProgressEvent {
                    processed,
                    total: dir_count,
                    current: last.name.clone(),
                });
            }
        }

        walker.commit(root, total, observed);
        sort_children_by_size(&mut children);

        let result = finish(root, total, children, &stats);
        tracing::info!(
            "Analyzed {} in {:.2}s: {} bytes, {} subdirectories, {} cache hits, {} skipped",
            root.display(),
            start.elapsed().as_secs_f64(),
            result.total,
            dir_count,
            result.stats.cache_hits,
            result.stats.skipped
        );
        Ok(result)
    }

    /// Sizes of one batch of root-level subdirectories, in batch order.
    fn sum_batch(&self, walker: &Walker<'_>, batch: &[RootDir]) -> Result<Vec<u64>> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                batch
                    .par_iter()
                    .map(|dir| walker.dir_size(&dir.path))
                    .collect()
            }),
            None => batch.iter().map(|dir| walker.dir_size(&dir.path)).collect(),
        }
    }
}

fn finish(
    root: &Path,
    total: u64,
    children: Vec<ChildSize>,
    stats: &StatsCollector,
) -> AnalysisResult {
    AnalysisResult {
        root: root.to_path_buf(),
        total,
        children,
        completed_at: Local::now(),
        stats: stats.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    #[cfg(unix)]
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    #[cfg(unix)]
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::format::format_size;

    fn write_file(path: &Path, len: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![0u8; len]).unwrap();
    }

    #[cfg(unix)]
    fn bump_mtime(dir: &Path) {
        let later = fs::metadata(dir).unwrap().modified().unwrap() + Duration::from_secs(5);
        File::open(dir).unwrap().set_modified(later).unwrap();
    }

    /// root/a/{100, 200}, root/b/{50}, root/top (10)
    fn sample_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        write_file(&temp.path().join("a/first"), 100);
        write_file(&temp.path().join("a/second"), 200);
        write_file(&temp.path().join("b/only"), 50);
        write_file(&temp.path().join("top"), 10);
        temp
    }

    fn breakdown(result: &AnalysisResult) -> Vec<(&str, u64)> {
        result
            .children
            .iter()
            .map(|c| (c.name.as_str(), c.size))
            .collect()
    }

    fn sequential() -> Engine {
        Engine::with_config(EngineConfig::sequential()).unwrap()
    }

    fn denied() -> io::Error {
        io::Error::from(io::ErrorKind::PermissionDenied)
    }

    /// Listing fails for directories named `a` or `guarded`.
    fn deny_listing(path: &Path) -> io::Result<fs::ReadDir> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("a" | "guarded") => Err(denied()),
            _ => fs::read_dir(path),
        }
    }

    /// Stat fails for anything named `guarded`.
    fn deny_stat(path: &Path) -> io::Result<fs::Metadata> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("guarded") => Err(denied()),
            _ => fs::metadata(path),
        }
    }

    #[test]
    fn sample_tree_totals() {
        let temp = sample_tree();
        let result = sequential().analyze(temp.path(), None, None).unwrap();

        assert_eq!(result.total, 360);
        assert_eq!(breakdown(&result), [("a", 300), ("b", 50)]);
        assert_eq!(format_size(result.total), "360.00B");
        assert_eq!(result.unlisted(), 10);
    }

    #[test]
    fn parallel_pool_matches_sequential() {
        let temp = TempDir::new().unwrap();
        for d in 0..23 {
            for f in 0..=d % 4 {
                write_file(&temp.path().join(format!("d{d:02}/n{f}/f")), d * 10 + f + 1);
            }
        }
        write_file(&temp.path().join("loose"), 7);

        let parallel = Engine::with_config(EngineConfig {
            threads: 4,
            root_batch_size: 5,
            ..EngineConfig::default()
        })
        .unwrap();
        let a = sequential().analyze(temp.path(), None, None).unwrap();
        let b = parallel.analyze(temp.path(), None, None).unwrap();

        assert_eq!(a.total, b.total);
        assert_eq!(a.children, b.children);
        assert_eq!(a.children.len(), 23);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let temp = sample_tree();
        let engine = sequential();
        let first = engine.analyze(temp.path(), None, None).unwrap();
        let second = engine.analyze(temp.path(), None, None).unwrap();

        assert_eq!(first.total, second.total);
        assert_eq!(first.children, second.children);
        assert_eq!(first.stats.dirs_enumerated, 3);
        // Only the root is listed; both subdirectories are cache hits
        assert_eq!(second.stats.dirs_enumerated, 1);
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.stats.cache_misses, 0);
        assert_eq!(engine.cache().lookup(temp.path()), Some(360));
    }

    #[cfg(unix)]
    #[test]
    fn changed_subdirectory_is_rescanned() {
        let temp = sample_tree();
        let engine = sequential();
        engine.analyze(temp.path(), None, None).unwrap();

        let a = temp.path().join("a");
        write_file(&a.join("third"), 1000);
        bump_mtime(&a);

        let result = engine.analyze(temp.path(), None, None).unwrap();
        assert_eq!(result.total, 1360);
        assert_eq!(breakdown(&result), [("a", 1300), ("b", 50)]);
        assert_eq!(result.stats.dirs_enumerated, 2);
        assert_eq!(result.stats.cache_hits, 1);
        assert_eq!(result.stats.cache_misses, 1);
        assert_eq!(engine.cache().lookup(&a), Some(1300));
    }

    #[cfg(unix)]
    #[test]
    fn nested_change_invalidates_only_that_level() {
        let temp = TempDir::new().unwrap();
        write_file(&temp.path().join("a/inner/f"), 5);
        write_file(&temp.path().join("a/g"), 1);
        let engine = sequential();
        engine.analyze(temp.path(), None, None).unwrap();

        let inner = temp.path().join("a/inner");
        write_file(&inner.join("h"), 20);
        bump_mtime(&inner);

        // `a` itself still looks unchanged, so its cached total is reused
        let result = engine.analyze(temp.path(), None, None).unwrap();
        assert_eq!(result.total, 6);
        assert_eq!(engine.cache().lookup(&inner), None);

        bump_mtime(&temp.path().join("a"));
        let result = engine.analyze(temp.path(), None, None).unwrap();
        assert_eq!(result.total, 26);
    }

    #[test]
    fn missing_root_is_not_found() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let err = sequential().analyze(&missing, None, None).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(p) if p == missing));
    }

    #[test]
    fn file_root_reports_its_own_size() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("blob");
        write_file(&file, 4096);

        let result = sequential().analyze(&file, None, None).unwrap();
        assert_eq!(result.total, 4096);
        assert!(result.children.is_empty());
    }

    #[test]
    fn empty_directories_are_left_out_of_breakdown() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("empty")).unwrap();
        write_file(&temp.path().join("zero/file"), 0);
        write_file(&temp.path().join("full/file"), 3);

        let result = sequential().analyze(temp.path(), None, None).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(breakdown(&result), [("full", 3)]);
    }

    #[test]
    fn denied_subtree_counts_as_zero() {
        let temp = sample_tree();
        let mut engine = sequential();
        engine.fs.read_dir = deny_listing;

        let result = engine.analyze(temp.path(), None, None).unwrap();
        assert_eq!(result.total, 60);
        assert_eq!(breakdown(&result), [("b", 50)]);
        assert_eq!(result.stats.skipped, 1);
        assert!(engine.cache().record(&temp.path().join("a")).is_none());
        assert_eq!(engine.cache().lookup(temp.path()), Some(60));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subtree_counts_as_zero() {
        use std::os::unix::fs::PermissionsExt;

        let temp = sample_tree();
        let locked = temp.path().join("a");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            eprintln!(
                "skipping unreadable_subtree_counts_as_zero: permission bits are \
                 not enforced for this user (denied_subtree_counts_as_zero covers it)"
            );
            return;
        }

        let engine = sequential();
        let result = engine.analyze(temp.path(), None, None);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let result = result.unwrap();
        assert_eq!(result.total, 60);
        assert_eq!(breakdown(&result), [("b", 50)]);
        assert!(result.stats.skipped >= 1);
        assert!(engine.cache().record(&locked).is_none());
    }

    #[test]
    fn unstattable_root_reports_zero() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("guarded");
        write_file(&root.join("sub/f"), 100);

        let mut engine = sequential();
        engine.fs.metadata = deny_stat;
        let result = engine.analyze(&root, None, None).unwrap();

        assert_eq!(result.total, 0);
        assert!(result.children.is_empty());
        assert_eq!(result.stats.skipped, 1);
        assert_eq!(result.stats.dirs_enumerated, 0);
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn unlistable_root_reports_zero() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("guarded");
        write_file(&root.join("sub/f"), 100);
        write_file(&root.join("loose"), 5);

        let mut engine = sequential();
        engine.fs.read_dir = deny_listing;
        let result = engine.analyze(&root, None, None).unwrap();

        assert_eq!(result.total, 0);
        assert!(result.children.is_empty());
        assert!(result.stats.skipped >= 1);
        assert_eq!(result.stats.dirs_enumerated, 0);
        assert!(engine.cache().record(&root).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn change_during_scan_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("r");
        write_file(&root.join("c/f"), 100);
        // Any write made below lands on a different mtime than this one
        bump_mtime(&root);

        let late = root.join("late");
        let sink = |_: &ProgressEvent| write_file(&late, 5000);
        let engine = sequential();
        let first = engine.analyze(&root, Some(&sink), None).unwrap();
        assert_eq!(first.total, 100);
        assert!(engine.cache().record(&root).is_none());
        assert_eq!(engine.cache().lookup(&root), None);

        // The parent sees the new file instead of a stale 100
        let parent = engine.analyze(temp.path(), None, None).unwrap();
        assert_eq!(parent.total, 5100);
        assert_eq!(breakdown(&parent), [("r", 5100)]);

        let again = engine.analyze(&root, None, None).unwrap();
        assert_eq!(again.total, 5100);
        assert_eq!(engine.cache().lookup(&root), Some(5100));
    }

    #[test]
    fn progress_is_reported_per_batch() {
        let temp = TempDir::new().unwrap();
        for d in 0..25 {
            write_file(&temp.path().join(format!("d{d:02}/f")), 1);
        }
        write_file(&temp.path().join("not-counted"), 1);

        let events = Mutex::new(Vec::new());
        let sink = |e: &ProgressEvent| events.lock().unwrap().push(e.clone());
        let result = sequential().analyze(temp.path(), Some(&sink), None).unwrap();
        assert_eq!(result.total, 26);

        let events = events.into_inner().unwrap();
        let seen: Vec<_> = events
            .iter()
            .map(|e| (e.processed, e.total, e.current.as_str()))
            .collect();
        assert_eq!(seen, [(10, 25, "d09"), (20, 25, "d19"), (25, 25, "d24")]);
    }

    #[test]
    fn progress_can_go_through_a_channel() {
        let temp = sample_tree();
        let (tx, rx) = mpsc::channel();
        sequential().analyze(temp.path(), Some(&tx), None).unwrap();
        drop(tx);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].processed, 2);
        assert_eq!(events[0].total, 2);
    }

    #[test]
    fn cancelled_before_start() {
        let temp = sample_tree();
        let token = CancelToken::new();
        token.cancel();

        let engine = sequential();
        let err = engine.analyze(temp.path(), None, Some(&token)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn cancelled_mid_scan_returns_no_result() {
        let temp = TempDir::new().unwrap();
        for d in 0..25 {
            write_file(&temp.path().join(format!("d{d:02}/f")), 1);
        }

        let token = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let sink = |_: &ProgressEvent| {
            calls.fetch_add(1, Ordering::SeqCst);
            token.cancel();
        };

        let engine = sequential();
        let err = engine
            .analyze(temp.path(), Some(&sink), Some(&token))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The finished first batch is cached, the root is not
        assert_eq!(engine.cache().len(), 10);
        assert!(engine.cache().record(temp.path()).is_none());
    }
}
