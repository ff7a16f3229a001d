//! hubsync CLI
//!
//! Runs a hub or a spoke over TCP against an in-memory store.
//!
//! # Commands
//!
//! - `serve` - Become the hub and accept spokes
//! - `join` - Connect to a hub as a spoke
//! - `id` - Print (creating if needed) this device's unique id

mod commands;

use clap::{Parser, Subcommand};
use commands::run::{Role, RunOptions};
use hubsync_core::transport::TcpTransportConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Star-topology record sync over TCP.
#[derive(Parser)]
#[command(name = "hubsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File holding this device's unique id
    #[arg(global = true, long, default_value = ".hubsync/device-id")]
    id_file: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `serve` and `join`.
#[derive(clap::Args)]
struct SyncArgs {
    /// Interface to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port the hub listens on
    #[arg(long, default_value_t = 8888)]
    server_port: u16,

    /// Port spokes listen on for pushes from the hub
    #[arg(long, default_value_t = 8889)]
    client_port: u16,

    /// Milliseconds between scans for local changes
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,

    /// JSON array of records to load before syncing
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Write every record as JSON here on exit
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Stop after this many seconds instead of reading stdin
    #[arg(long)]
    duration: Option<u64>,
}

impl SyncArgs {
    fn options(self, id_file: PathBuf) -> RunOptions {
        RunOptions {
            id_file,
            transport: TcpTransportConfig::new()
                .with_bind_host(self.bind)
                .with_server_port(self.server_port)
                .with_client_port(self.client_port),
            poll_interval: Duration::from_millis(self.poll_ms),
            seed: self.seed,
            dump: self.dump,
            duration: self.duration.map(Duration::from_secs),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Become the hub and accept spokes
    Serve {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Connect to the hub at HOST as a spoke
    Join {
        /// Host of the hub
        host: String,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Print this device's unique id
    Id,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { sync } => {
            commands::run::run(Role::Serve, sync.options(cli.id_file))?;
        }
        Commands::Join { host, sync } => {
            commands::run::run(Role::Join(host), sync.options(cli.id_file))?;
        }
        Commands::Id => commands::id::run(&cli.id_file)?,
    }

    Ok(())
}
