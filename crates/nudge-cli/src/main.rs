mod client;
mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "nudge",
    about = "Nudge operator: webhook server and sweep controls",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(long, global = true, env = "NUDGE_CONFIG", default_value = nudge_core::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Base URL of a running nudge server
    #[arg(long, global = true, env = "NUDGE_SERVER", default_value = "http://localhost:8787")]
    server: String,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (events, card callbacks, sweep triggers)
    Serve {
        /// Port to listen on
        #[arg(long, env = "NUDGE_PORT", default_value = "8787")]
        port: u16,
        /// Shared secret for inbound event signatures
        #[arg(long, env = "NUDGE_WEBHOOK_SECRET", hide_env_values = true)]
        webhook_secret: Option<String>,
    },

    /// Sweep an owner's repositories and print the report
    Scan {
        owner: String,
        /// Cancel a running sweep instead of failing
        #[arg(long)]
        supersede: bool,
    },

    /// Ask a running sweep to stop at its next batch boundary
    Cancel { owner: String },

    /// Show the active sweep and the last report for an owner
    Status { owner: String },

    /// Inspect the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve {
            port,
            webhook_secret,
        } => cmd::serve::run(&cli.config, port, webhook_secret),
        Commands::Scan { owner, supersede } => {
            cmd::scan::run(&cli.server, &owner, supersede, cli.json)
        }
        Commands::Cancel { owner } => cmd::cancel::run(&cli.server, &owner, cli.json),
        Commands::Status { owner } => cmd::status::run(&cli.server, &owner, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
