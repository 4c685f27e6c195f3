//! Trove CLI
//!
//! Inspect a store file: allocation figures, integrity, roots and objects.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use trove::objects::ObjectStorage;
use trove::{Config, Result, Store};

/// Trove CLI
#[derive(Parser, Debug)]
#[command(name = "trove-cli")]
#[command(about = "Inspect a Trove object store file")]
#[command(version)]
struct Args {
    /// Store file
    #[arg(short, long, default_value = "./trove.db")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print allocation and object counts
    Stats,

    /// Verify the allocation tables
    Check,

    /// List root names and the object IDs they point to
    Roots,

    /// List claimed object IDs
    Ids,

    /// Print the raw blob stored under an ID as hex
    Dump {
        /// Object ID
        id: u64,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,trove=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if !args.file.exists() {
        tracing::error!("No store file at {}", args.file.display());
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = Config::builder().path(&args.file).build();

    match &args.command {
        Commands::Stats => {
            let store = Store::open(config)?;
            let stats = store.stats()?;
            println!("file:        {}", args.file.display());
            println!("file length: {}", stats.file_len);
            println!("objects:     {}", stats.objects);
            println!("id capacity: {}", stats.id_capacity);
            println!("allocated:   {}", stats.allocated_bytes);
            println!("free:        {}", stats.free_bytes);
            println!("fragments:   {}", stats.fragments);
            store.close()
        }
        Commands::Check => {
            let store = Store::open(config)?;
            if store.check_integrity()? {
                println!("ok");
            } else {
                println!("allocation tables are inconsistent");
            }
            store.close()
        }
        Commands::Roots => {
            let store = Store::open(config)?;
            for (name, id) in store.roots()? {
                println!("{}\t{}", name, id);
            }
            store.close()
        }
        Commands::Ids => {
            let mut storage = ObjectStorage::open(&config)?;
            let ids: Vec<u64> = storage.iter_ids().collect();
            for id in ids {
                let state = if storage.contains(id)? { "stored" } else { "reserved" };
                println!("{}\t{}", id, state);
            }
            storage.close()
        }
        Commands::Dump { id } => {
            let mut storage = ObjectStorage::open(&config)?;
            let blob = storage.get(*id)?;
            println!("{} bytes", blob.len());
            for line in blob.chunks(16) {
                let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", hex.join(" "));
            }
            storage.close()
        }
    }
}
