use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use strata_core::cache::{DiskCache, DiskCacheStats, DiskEntryInfo, DiskStore};
use strata_core::clock::system_clock;
use strata_core::{CacheKey, Clock, StrataConfig, logging};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "strata-cli")]
#[command(about = "Strata CLI - inspect and maintain an on-disk cache", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache directory (overrides disk.directory from the config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entry counts, byte usage and capacity
    Stats,
    /// List stored entries
    List {
        /// Only entries past their hard TTL
        #[arg(long)]
        expired: bool,
    },
    /// Show one entry and its payload
    Show { key: String },
    /// Remove every entry past its hard TTL
    PurgeExpired,
    /// Rewrite the data file without dead records
    Compact,
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let outcome = match load_config(&args) {
        Ok(config) => match logging::init(&config.logging) {
            Ok(()) => run(&args, &config).await,
            Err(e) => Err(anyhow::Error::new(e).context("failed to initialise logging")),
        },
        Err(e) => Err(e),
    };

    match outcome {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{}", format!("Error: {:#}", e).red());
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args, config: &StrataConfig) -> Result<String> {
    let disk_config = config.to_disk_config();
    debug!("Opening disk cache at {:?}", disk_config.directory);

    let clock = system_clock();
    let cache = DiskCache::open(disk_config, clock.clone())
        .await
        .with_context(|| format!("failed to open cache at {}", config.disk.directory.display()))?;
    let now = clock.now_millis();

    match &args.command {
        Command::Stats => {
            let stats = cache.stats().await;
            if args.json {
                Ok(serde_json::to_string_pretty(&stats)?)
            } else {
                Ok(format_stats(&cache, &stats))
            }
        }
        Command::List { expired } => {
            let entries: Vec<DiskEntryInfo> = cache
                .entries()
                .await
                .into_iter()
                .filter(|e| !expired || now >= e.ttl)
                .collect();
            if args.json {
                Ok(serde_json::to_string_pretty(&entries)?)
            } else {
                Ok(format_entries(&entries, now))
            }
        }
        Command::Show { key } => {
            let key = CacheKey::new(key.as_str());
            let entry = cache
                .get(&key)
                .await?
                .with_context(|| format!("no entry for key {}", key))?;

            if args.json {
                let payload = serde_json::from_slice::<serde_json::Value>(entry.data()).ok();
                Ok(serde_json::to_string_pretty(&serde_json::json!({
                    "key": key,
                    "ttl": entry.ttl(),
                    "soft_ttl": entry.soft_ttl(),
                    "size_bytes": entry.data().len(),
                    "payload": payload,
                }))?)
            } else {
                let mut out = format!("{} {}\n", "key:".bold(), key);
                out.push_str(&format!(
                    "{} {}\n{} {}\n{} {} bytes\n",
                    "ttl:".bold(),
                    describe_deadline(entry.ttl(), now),
                    "soft ttl:".bold(),
                    describe_deadline(entry.soft_ttl(), now),
                    "size:".bold(),
                    entry.data().len()
                ));
                out.push_str(&format_payload(entry.data()));
                Ok(out)
            }
        }
        Command::PurgeExpired => {
            let purged = cache.purge_expired().await?;
            Ok(format!("{} {} expired entries", "Purged".green(), purged))
        }
        Command::Compact => {
            let reclaimed = cache.compact().await?;
            Ok(format!("{} {} bytes", "Reclaimed".green(), reclaimed))
        }
        Command::Clear => {
            let removed = cache.evict_all().await?;
            Ok(format!("{} {} entries", "Removed".green(), removed))
        }
    }
}

fn load_config(args: &Args) -> Result<StrataConfig> {
    let mut config = match &args.config {
        Some(path) => StrataConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let mut config = StrataConfig::default();
            // Library lifecycle logs would drown command output
            config.logging.level = "warn".to_string();
            config
        }
    };
    if let Some(dir) = &args.dir {
        config.disk.directory = dir.clone();
    }
    Ok(config)
}

fn format_stats(cache: &DiskCache, stats: &DiskCacheStats) -> String {
    format!(
        "{}\n  directory:   {}\n  entries:     {} ({} expired)\n  live bytes:  {}\n  file bytes:  {} ({} dead)\n  capacity:    {} MB ({:.2}% used)",
        "Disk cache".bold().cyan(),
        cache.directory().display(),
        stats.entries,
        stats.expired_entries,
        stats.live_bytes,
        stats.file_bytes,
        stats.dead_bytes,
        stats.capacity_mb,
        stats.utilization
    )
}

fn format_entries(entries: &[DiskEntryInfo], now: u64) -> String {
    if entries.is_empty() {
        return "(empty)".dimmed().to_string();
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let state = if now >= e.ttl {
                "expired".red()
            } else if now >= e.soft_ttl {
                "stale".yellow()
            } else {
                "fresh".green()
            };
            format!(
                "{}) {} {:>8} bytes  {}  {}",
                i + 1,
                e.key,
                e.size_bytes,
                state,
                describe_deadline(e.ttl, now).dimmed()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Absolute time plus a relative hint, e.g. `2024-01-01 10:00:00 UTC (in 9m)`
fn describe_deadline(deadline: u64, now: u64) -> String {
    let absolute = i64::try_from(deadline)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| deadline.to_string());

    let relative = if deadline > now {
        format!("in {}", humanize(deadline - now))
    } else {
        format!("{} ago", humanize(now - deadline))
    };
    format!("{} ({})", absolute, relative)
}

fn humanize(millis: u64) -> String {
    let secs = millis / 1000;
    match secs {
        0..60 => format!("{}s", secs),
        60..3600 => format!("{}m", secs / 60),
        3600..86_400 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Payloads are opaque codec output; show JSON or text when they happen to be one
fn format_payload(data: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Ok(pretty) = serde_json::to_string_pretty(&value) {
            return pretty;
        }
    }
    match std::str::from_utf8(data) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            format!("\"{}\"", text)
        }
        _ => format!("{}", "(binary payload)".dimmed()),
    }
}
