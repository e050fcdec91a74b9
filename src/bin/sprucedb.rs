//! SpruceDB Driver Binary
//!
//! Thin CLI around the embedded engine: opens a data directory, runs one
//! operation, closes cleanly. Process lifecycle, argument parsing, and
//! configuration wiring live here; the engine stays a library.

use clap::{Parser, Subcommand};
use sprucedb::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// SpruceDB — embedded persistent key-value store
#[derive(Parser, Debug)]
#[command(name = "sprucedb")]
#[command(about = "Embedded persistent key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./spruce_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "4")]
    memtable_mb: usize,

    /// Segments per size tier before compaction
    #[arg(long, default_value = "4")]
    fan_out: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key
    Put { key: String, value: String },

    /// Fetch the value for a key
    Get { key: String },

    /// Delete a key
    Delete { key: String },

    /// List key-value pairs in [start, end), ascending
    Scan {
        /// Inclusive lower bound (unbounded if omitted)
        #[arg(long)]
        start: Option<String>,

        /// Exclusive upper bound (unbounded if omitted)
        #[arg(long)]
        end: Option<String>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sprucedb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    tracing::info!("SpruceDB v{}", sprucedb::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    if let Err(e) = run(args) {
        tracing::error!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> sprucedb::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .compaction_fan_out(args.fan_out)
        .build();

    let engine = Engine::open(config)?;

    match &args.command {
        Command::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Command::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Command::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Command::Scan { start, end } => {
            let scan = engine.scan(
                start.as_deref().map(str::as_bytes),
                end.as_deref().map(str::as_bytes),
            )?;
            for item in scan {
                let (key, value) = item?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
    }

    engine.close()
}
