//! tiercache: cache inspection and maintenance
//!
//! Usage:
//!   tiercache stats   [--dir <path>] [--config <file>]   Show usage against the budget
//!   tiercache list    [--dir <path>] [--config <file>]   List cached templates
//!   tiercache cleanup [--dir <path>] [--config <file>]   Run priority cleanup now
//!   tiercache sync    [--dir <path>] [--config <file>]   Expire entries and enforce limits
//!   tiercache clear   [--dir <path>] [--config <file>]   Remove everything

use std::path::PathBuf;
use std::process::ExitCode;
use tiercache::{CacheSettings, IntegratedCache, SyncOutcome};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!(
        r#"tiercache: cache inspection and maintenance

USAGE:
    tiercache <COMMAND> [OPTIONS]

COMMANDS:
    stats       Show cache usage against the budget
    list        List cached templates
    cleanup     Run priority cleanup now
    sync        Expire API entries and enforce the template limit
    clear       Remove every cached entry
    version     Show version information
    help        Show this help message

OPTIONS:
    --dir <path>        Cache root (overrides settings)
    --config <file>     Settings file (.json, .yaml, .yml)

ENVIRONMENT:
    TIERCACHE_DIR               Cache root
    TIERCACHE_TTL_MS            API cache TTL in milliseconds
    TIERCACHE_MAX_TOTAL_SIZE    Budget in bytes
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn resolve_settings(args: &[String]) -> anyhow::Result<CacheSettings> {
    let mut settings = match flag_value(args, "--config") {
        Some(path) => CacheSettings::load(&PathBuf::from(path))?.apply_env()?,
        None => CacheSettings::from_env()?,
    };
    if let Some(dir) = flag_value(args, "--dir") {
        settings.cache_dir = PathBuf::from(dir);
    }
    Ok(settings)
}

fn human(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

async fn run(command: &str, args: &[String]) -> anyhow::Result<()> {
    let settings = resolve_settings(args)?;
    let cache = IntegratedCache::builder(settings).build().await?;

    match command {
        "stats" => {
            let stats = cache.stats().await;
            let b = &stats.budget;
            println!("cache dir:   {}", cache.settings().cache_dir.display());
            println!(
                "total:       {} / {} ({:.1}%)",
                human(b.total_size),
                human(b.max_total_size),
                b.usage_ratio() * 100.0
            );
            println!(
                "github-api:  {} in {} files",
                human(b.api_size),
                cache.api().disk_entries().await
            );
            println!(
                "templates:   {} in {} entries (limit {})",
                human(b.template_size),
                stats.templates.entries,
                human(stats.templates.max_size)
            );
            if let Some(checked) = stats.templates.last_update_check {
                println!("last sync:   {}", checked.to_rfc3339());
            }
        }
        "list" => {
            let entries = cache.templates().list().await;
            if entries.is_empty() {
                println!("no cached templates");
            }
            for (id, entry) in entries {
                println!(
                    "{:<40} {:>10}  {}  {}",
                    id.to_string(),
                    human(entry.size),
                    entry.cached_at.format("%Y-%m-%d %H:%M"),
                    &entry.checksum[..12.min(entry.checksum.len())]
                );
            }
        }
        "cleanup" => {
            let report = cache.smart_cleanup().await?;
            for source in &report.sources {
                println!(
                    "{:<12} freed {} ({} removed)",
                    source.source.as_str(),
                    human(source.bytes_freed),
                    source.removed
                );
            }
            println!(
                "total freed {}, usage {} -> {}",
                human(report.bytes_freed),
                human(report.before.total_size),
                human(report.after.total_size)
            );
        }
        "sync" => match cache.synchronize().await? {
            SyncOutcome::Offline => println!("offline; nothing synchronized"),
            SyncOutcome::Synchronized {
                api_entries_removed,
                template_eviction,
                budget,
            } => println!(
                "expired {} API entries, evicted {} templates, usage {}",
                api_entries_removed,
                template_eviction.evicted.len(),
                human(budget.total_size)
            ),
        },
        "clear" => {
            cache.clear().await?;
            println!("cache cleared");
        }
        other => anyhow::bail!("unknown command: {}", other),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_usage();
        return ExitCode::FAILURE;
    };

    match command.as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("tiercache {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        cmd => match run(cmd, &args[2..]).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}
