//! relaysync - host-authoritative replication over a relay
//!
//! One binary for every role: the relay server, a lobby host, a joining
//! client and an in-process demo.

mod config;
mod demo;
mod runner;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Host-authoritative state replication over a relay", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Relay,
    /// Open a lobby on the relay and host it
    Host {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Join a lobby by code
    Join {
        /// Lobby code printed by the host
        code: String,
        /// Display name
        #[arg(long, default_value = "player")]
        username: String,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Host plus bot clients in one process over an in-memory relay
    Demo {
        /// Number of bot clients
        #[arg(long, default_value_t = 3)]
        bots: u32,
        /// Ticks to simulate
        #[arg(long, default_value_t = 600)]
        ticks: u64,
        /// Seed for bot behaviour
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default, overridable via RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from_path(&cli.config);
    info!("Starting relaysync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Relay => runner::relay(&config).await,
        Command::Host { ticks } => runner::host(config, ticks).await,
        Command::Join {
            code,
            username,
            ticks,
        } => runner::join(config, code, username, ticks).await,
        Command::Demo { bots, ticks, seed } => {
            let report = tokio::task::spawn_blocking(move || demo::run(&config, bots, ticks, seed))
                .await
                .context("Demo thread panicked")??;
            info!("{}", report);
            Ok(())
        }
    }
}
