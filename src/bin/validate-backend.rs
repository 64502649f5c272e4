/// Backend validation tool
/// Checks: cold scan → independent reference walk → warm (cached) scan → formatting
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use compact_str::CompactString;
use jwalk::{Parallelism, WalkDir};
use spacesaver_rs::{format_size, parse_size, AnalysisResult, Engine, EngineConfig};

/// Totals from a plain parallel walk that knows nothing about the cache.
struct Reference {
    total: u64,
    children: HashMap<CompactString, u64>,
    errors: u64,
}

fn reference_walk(root: &Path, threads: usize) -> Reference {
    let mut reference = Reference {
        total: 0,
        children: HashMap::new(),
        errors: 0,
    };

    let walk = WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .parallelism(Parallelism::RayonNewPool(threads));

    for entry in walk {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                reference.errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => {
                reference.errors += 1;
                continue;
            }
        };
        reference.total += size;

        // Attribute to the immediate child of root it lives under
        if entry.depth > 1 {
            let path = entry.path();
            if let Some(first) = path.strip_prefix(root).ok().and_then(|p| p.iter().next()) {
                *reference
                    .children
                    .entry(CompactString::new(first.to_string_lossy()))
                    .or_default() += size;
            }
        }
    }

    reference.children.retain(|_, size| *size > 0);
    reference
}

fn compare(result: &AnalysisResult, reference: &Reference) -> usize {
    let mut mismatches = 0;
    if result.total != reference.total {
        println!(
            "  ✗ Total differs: engine {} vs reference {}",
            result.total, reference.total
        );
        mismatches += 1;
    }
    if result.children.len() != reference.children.len() {
        println!(
            "  ✗ Child count differs: engine {} vs reference {}",
            result.children.len(),
            reference.children.len()
        );
        mismatches += 1;
    }
    for child in &result.children {
        let expected = reference.children.get(&child.name).copied().unwrap_or(0);
        if expected != child.size {
            println!(
                "  ✗ '{}': engine {} vs reference {}",
                child.name, child.size, expected
            );
            mismatches += 1;
            if mismatches >= 5 {
                println!("  ... (truncated, too many differences)");
                break;
            }
        }
    }
    mismatches
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spacesaver_rs=warn".parse()?),
        )
        .init();

    let scan_path = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir()?,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║        SPACESAVER-RS BACKEND VALIDATION TOOL                ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Target: {}", scan_path.display());
    println!();

    let config = EngineConfig::default();
    let threads = config.threads;
    let engine = Engine::with_config(config)?;
    let mut failures = 0;

    // === STAGE 1: COLD SCAN ===
    println!("┌─ STAGE 1: COLD SCAN ───────────────────────────────────────┐");
    let start = Instant::now();
    let cold = engine.analyze(&scan_path, None, None)?;
    let cold_duration = start.elapsed();
    println!("  ✓ Scan completed in {:.2}s", cold_duration.as_secs_f64());
    println!("  ✓ Total:    {} ({} bytes)", format_size(cold.total), cold.total);
    println!(
        "  ✓ Listed:   {} dirs, {} files, {} skipped",
        cold.stats.dirs_enumerated, cold.stats.files_sized, cold.stats.skipped
    );
    println!("  ✓ Children: {} with size > 0", cold.children.len());
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    // === STAGE 2: REFERENCE WALK ===
    println!("┌─ STAGE 2: REFERENCE WALK (jwalk) ──────────────────────────┐");
    let start = Instant::now();
    let reference = reference_walk(&scan_path, threads);
    let reference_duration = start.elapsed();
    println!("  ✓ Walk completed in {:.2}s", reference_duration.as_secs_f64());
    println!("  ✓ Total:    {} ({} errors)", format_size(reference.total), reference.errors);
    let mismatches = compare(&cold, &reference);
    if mismatches == 0 {
        println!("  ✓ Engine and reference agree");
    } else {
        println!("  ⚠ {} differences (a live filesystem may change between walks)", mismatches);
        failures += 1;
    }
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    // === STAGE 3: WARM SCAN ===
    println!("┌─ STAGE 3: WARM SCAN (cache) ───────────────────────────────┐");
    let start = Instant::now();
    let warm = engine.analyze(&scan_path, None, None)?;
    let warm_duration = start.elapsed();
    println!("  ✓ Scan completed in {:.2}ms", warm_duration.as_secs_f64() * 1000.0);
    println!(
        "  ✓ Cache:    {} hits, {} misses, {} dirs listed",
        warm.stats.cache_hits, warm.stats.cache_misses, warm.stats.dirs_enumerated
    );
    if warm.total != cold.total || warm.children != cold.children {
        println!("  ✗ Warm result differs from cold result");
        failures += 1;
    }
    if warm.stats.dirs_enumerated > 1 {
        println!(
            "  ⚠ {} directories re-listed (changed since the cold scan?)",
            warm.stats.dirs_enumerated - 1
        );
    } else {
        println!("  ✓ Only the root was listed");
    }
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    // === STAGE 4: FORMATTING ===
    println!("┌─ STAGE 4: SIZE FORMATTING ─────────────────────────────────┐");
    for (bytes, expected) in [
        (360u64, "360.00B"),
        (1_253_656, "1.20MB"),
        (1_253_656_678, "1.17GB"),
    ] {
        let text = format_size(bytes);
        if text == expected {
            println!("  ✓ {} => {}", bytes, text);
        } else {
            println!("  ✗ {} => {} (expected {})", bytes, text, expected);
            failures += 1;
        }
    }
    let text = format_size(cold.total);
    let back = parse_size(&text, 1024.0)?;
    println!("  ✓ {} parses back to {} bytes", text, back);
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    // === FINAL SUMMARY ===
    if failures == 0 {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║                    ✓ ALL CHECKS PASSED                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝");
    } else {
        println!("✗ {} check(s) failed", failures);
    }
    println!();
    println!("Pipeline summary:");
    println!("  • Cold scan:    {:.2}s", cold_duration.as_secs_f64());
    println!("  • Reference:    {:.2}s", reference_duration.as_secs_f64());
    println!("  • Warm scan:    {:.2}ms", warm_duration.as_secs_f64() * 1000.0);

    Ok(())
}
