//! Opt-out Operator Tool
//!
//! Inspects delta/partition files and prints compaction schedule state.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use optout::entry::codec;
use optout::storage::read_entry_file;
use optout::{Config, DedupHeap, IdentityHash, OptOutFile, ReplicationCoordinator, ENTRY_SIZE};
use tracing_subscriber::{fmt, EnvFilter};

/// Opt-out operator tool
#[derive(Parser, Debug)]
#[command(name = "optout-tool")]
#[command(about = "Inspect opt-out files and replica schedules")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the entries of a delta or partition file
    Inspect {
        /// The file to read
        file: PathBuf,

        /// Maximum entries to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Look up an identity hash in a file
    Lookup {
        /// Delta or partition file
        file: PathBuf,

        /// Identity hash, 64 hex digits
        hash: String,
    },

    /// Show the partition cutoff and replica turn
    Schedule {
        /// JSON config file
        #[arg(short, long)]
        config: PathBuf,

        /// Evaluate at this RFC 3339 time instead of now
        #[arg(short, long)]
        now: Option<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,optout=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Inspect { file, limit } => inspect(&file, limit),
        Commands::Lookup { file, hash } => lookup(&file, &hash),
        Commands::Schedule { config, now } => schedule(&config, now.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn inspect(file: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(name) = OptOutFile::from_path(file) {
        println!(
            "kind={:?} replica={} timestamp={}",
            name.kind, name.replica_id, name.timestamp
        );
    }

    let bytes = read_entry_file(file)?;
    let count = bytes.len() / ENTRY_SIZE;
    println!("entries={}", count);

    for i in 0..count.min(limit) {
        let entry = codec::parse(&bytes, i * ENTRY_SIZE);
        println!(
            "{:>6} hash={} ts={} tombstone={} special={}",
            i,
            to_hex(&entry.identity_hash),
            entry.timestamp,
            entry.is_tombstone,
            codec::is_special_hash(&entry.identity_hash)
        );
    }
    Ok(())
}

fn lookup(file: &Path, hash: &str) -> Result<(), Box<dyn std::error::Error>> {
    let identity_hash = parse_hex_hash(hash)?;

    let bytes = read_entry_file(file)?;
    let mut heap = DedupHeap::new((bytes.len() / ENTRY_SIZE).max(1));
    heap.add_encoded(&bytes);
    let partition = heap.to_partition(true);

    match partition.get_opt_out_timestamp(&identity_hash) {
        -1 => println!("not found"),
        ts => println!("opted out at {}", ts),
    }
    Ok(())
}

fn schedule(config: &Path, now: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_json_file(config)?;
    let now = match now {
        Some(raw) => DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc),
        None => Utc::now(),
    };

    let coordinator = ReplicationCoordinator::new(&config)?;
    let cutoff = coordinator.policy().truncate_to_partition_cutoff(now);
    let turn = coordinator.replica_turn(now);

    println!("now={}", now);
    println!("cutoff={}", cutoff);
    println!("turn={} replica={} owns_turn={}", turn, config.replica_id, turn == config.replica_id);
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_hex_hash(hex: &str) -> Result<IdentityHash, String> {
    if hex.len() != 64 || !hex.is_ascii() {
        return Err(format!("expected 64 hex digits, got {:?}", hex));
    }
    let mut hash = [0u8; 32];
    for (i, byte) in hash.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .map_err(|e| format!("invalid hex at {}: {}", 2 * i, e))?;
    }
    Ok(hash)
}
