//! refstore-admin - maintenance commands for an LMDB-backed reference store
//!
//! Usage:
//!   refstore-admin <store-dir> stats
//!   refstore-admin <store-dir> streams
//!   refstore-admin <store-dir> purge-unused
//!   refstore-admin <store-dir> purge-old [--now-ms <epoch-ms>]
//!
//! Log level is taken from RUST_LOG (default: info).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use refstore::record::now_ms;
use refstore::RefDataStore;

const USAGE: &str = "Usage: refstore-admin <store-dir> <stats|streams|purge-unused|purge-old> [--now-ms <epoch-ms>]";

fn print_help() {
    println!("refstore-admin {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("{}", USAGE);
    println!();
    println!("Commands:");
    println!("  stats          Entry counts of every table");
    println!("  streams        Loaded reference streams and their state");
    println!("  purge-unused   Delete lookup entries no live entry refers to");
    println!("  purge-old      Purge idle or failed streams, then unused lookups");
    println!();
    println!("Flags:");
    println!("  --now-ms       Reference time for purge-old (default: now)");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("refstore-admin {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    if args.len() < 3 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let dir = PathBuf::from(&args[1]);
    if args[1].starts_with("--") {
        bail!("store-dir '{}' looks like a flag, not a path", args[1]);
    }
    let store = RefDataStore::open_dir(&dir)
        .with_context(|| format!("opening store at {}", dir.display()))?;

    match args[2].as_str() {
        "stats" => {
            for (table, count) in store.entry_counts()? {
                println!("{:<20} {}", table, count);
            }
        }
        "streams" => {
            for (def, info) in store.list_ref_streams()? {
                println!(
                    "{} {} stream={} part={} state={} last_accessed={} effective={}",
                    def.pipeline_doc_uuid,
                    def.pipeline_version,
                    def.stream_id,
                    def.part_index,
                    info.state.as_str(),
                    info.last_accessed_time_ms,
                    info.effective_time_ms
                );
            }
        }
        "purge-unused" => {
            let summary = store.purge_unused()?;
            for (table, removed) in &summary.removed {
                println!("{:<20} {}", table, removed);
            }
            println!("total                {}", summary.total());
        }
        "purge-old" => {
            let now = match args.iter().position(|a| a == "--now-ms") {
                Some(i) => args
                    .get(i + 1)
                    .context("--now-ms needs a value")?
                    .parse::<i64>()
                    .context("--now-ms must be an integer")?,
                None => now_ms(),
            };
            let summary = store.purge_old_data(now)?;
            println!(
                "streams purged: {}, failed: {}, entries: {}, lookups removed: {}",
                summary.streams_purged,
                summary.streams_failed,
                summary.entries,
                summary.unused.total()
            );
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}
