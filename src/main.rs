use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use spacesaver_rs::format::{check_factor, DEFAULT_SIZE_FACTOR};
use spacesaver_rs::{format_size_with, AnalysisResult, Engine, EngineConfig, ProgressEvent};

/// Children below this share of the total are folded into "(other)".
const DEFAULT_MIN_SHARE_PERCENT: f64 = 3.0;

/// Command line options. Everything except the path is optional.
struct Options {
    path: PathBuf,
    config: EngineConfig,
    report: ReportOptions,
    /// Analyze twice to show the second pass being served from the cache
    twice: bool,
}

/// How the breakdown is printed. Has no effect on the scan itself.
struct ReportOptions {
    /// Divisor between size units (1024 for KiB-style, 1000 for SI)
    factor: f64,
    /// Minimum share of the total (percent) for a child to get its own row
    min_share: f64,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut path = None;
    let mut config = EngineConfig::default();
    let mut report = ReportOptions {
        factor: DEFAULT_SIZE_FACTOR,
        min_share: DEFAULT_MIN_SHARE_PERCENT,
    };
    let mut twice = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--threads" => config.threads = next_value(&mut args, &arg)?,
            "--batch" => config.root_batch_size = next_value(&mut args, &arg)?,
            "--min-share" => report.min_share = next_value(&mut args, &arg)?,
            "--factor" => report.factor = next_value(&mut args, &arg)?,
            "--twice" => twice = true,
            "-h" | "--help" => {
                println!(
                    "usage: spacesaver-rs [PATH] [--threads N] [--batch N] \
                     [--min-share PCT] [--factor F] [--twice]"
                );
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument: {arg}"),
        }
    }

    check_factor(report.factor)?;

    let path = match path {
        Some(p) => p,
        None => std::env::current_dir().context("current directory is unavailable")?,
    };
    Ok(Options {
        path,
        config,
        report,
        twice,
    })
}

fn next_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .next()
        .with_context(|| format!("{flag} needs a value"))?;
    raw.parse()
        .with_context(|| format!("invalid value for {flag}: {raw}"))
}

/// Run one analysis on a background thread and log its progress from this one.
fn run_scan(engine: &Arc<Engine>, path: &Path) -> Result<AnalysisResult> {
    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let worker = {
        let engine = Arc::clone(engine);
        let path = path.to_path_buf();
        std::thread::spawn(move || engine.analyze(&path, Some(&tx), None))
    };

    // Ends when the worker drops its sender
    for event in rx {
        tracing::info!(
            "Scanned {}/{} ({:.0}%): {}",
            event.processed,
            event.total,
            event.percent(),
            event.current
        );
    }

    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("scan thread panicked"))??;
    Ok(result)
}

fn print_report(result: &AnalysisResult, report: &ReportOptions) -> Result<()> {
    let fmt = |bytes: u64| format_size_with(bytes as f64, report.factor);

    println!(
        "Total size: {} - {} (analyzed at {})",
        fmt(result.total)?,
        result.root_name(),
        result.completed_at.format("%H:%M:%S")
    );

    if result.children.is_empty() {
        println!("No directories with size > 0 found");
        return Ok(());
    }

    let mut shown: u64 = 0;
    for child in result.children_above(report.min_share) {
        shown += child.size;
        println!(
            "  {:>12}  {:>5.1}%  {}",
            fmt(child.size)?,
            result.share(child),
            child.name
        );
    }
    let rest = result.total.saturating_sub(shown);
    if rest > 0 {
        println!(
            "  {:>12}  {:>5.1}%  (other)",
            fmt(rest)?,
            rest as f64 * 100.0 / result.total as f64
        );
    }

    let stats = &result.stats;
    println!(
        "{} dirs listed, {} files sized, {} cache hits, {} skipped",
        stats.dirs_enumerated, stats.files_sized, stats.cache_hits, stats.skipped
    );
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spacesaver_rs=info".parse()?),
        )
        .init();

    let options = parse_args(std::env::args().skip(1))?;
    tracing::info!("SpaceSaver-rs starting, scan path: {:?}", options.path);

    let engine = Arc::new(Engine::with_config(options.config.clone())?);

    let result = run_scan(&engine, &options.path)?;
    print_report(&result, &options.report)?;

    if options.twice {
        let again = run_scan(&engine, &options.path)?;
        println!();
        print_report(&again, &options.report)?;
    }

    Ok(())
}
