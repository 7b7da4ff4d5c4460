use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use localnet::config;
use localnet::logging::init_tracing;
use localnet_common::LogLevel;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "localnet")]
#[command(version, about = "Ephemeral local test cluster orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Defaults to ./localnet.toml when present.
    #[arg(long, global = true, env = "LOCALNET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the cluster up, print its endpoints and wallets, hold until Ctrl-C
    Up {
        /// Number of funded wallets
        #[arg(long, default_value = "2")]
        wallets: usize,

        /// Lovelace per UTxO
        #[arg(long, default_value = "1000000000")]
        amount: u64,

        /// UTxOs per wallet
        #[arg(long, default_value = "1")]
        utxos: usize,

        /// Do not start the application server
        #[arg(long)]
        no_app_server: bool,
    },
    /// Check that every configured port is free
    Preflight,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let dir = std::env::current_dir().context("Failed to get current directory")?;

    let mut config = config::resolve(cli.config.as_deref(), &dir)?;
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.log_level
    };
    init_tracing(level);
    for warning in config::validate(&config) {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Up {
            wallets,
            amount,
            utxos,
            no_app_server,
        } => {
            localnet::process::safety_net::watch_termination_signals();
            if no_app_server {
                config.app_server = None;
            }
            cmd::cmd_up(config, wallets, amount, utxos).await?;
        }
        Commands::Preflight => cmd::cmd_preflight(&config)?,
        Commands::ShowConfig => cmd::cmd_show_config(&config, cli.config.as_deref(), &dir)?,
    }

    Ok(())
}
