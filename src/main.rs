use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concord::commands::{self, ServeParams};
use concord::config::Config;

#[derive(Parser)]
#[command(
    name = "concord",
    version,
    about = "Service registry and query-routing coordinator",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to CONCORD_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server
    Serve {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds without heartbeat before a provider is evicted
        #[arg(long)]
        expiry_interval: Option<u64>,

        /// Seconds between sweep + snapshot ticks
        #[arg(long)]
        sweep_interval: Option<u64>,

        /// Snapshot file path
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Keep state in memory only
        #[arg(long, default_value = "false")]
        no_persist: bool,

        /// Seconds before an unused subscription is dropped
        #[arg(long)]
        subscription_idle_timeout: Option<u64>,

        /// Disable CORS
        #[arg(long, default_value = "false")]
        no_cors: bool,

        /// Disable request logging
        #[arg(long, default_value = "false")]
        no_request_logging: bool,

        /// Skip the snapshot written on shutdown
        #[arg(long, default_value = "false")]
        no_final_dump: bool,
    },

    /// Print a summary of a snapshot file
    Inspect {
        /// Snapshot file (defaults to the configured snapshot path)
        snapshot: Option<PathBuf>,

        /// Print as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = concord::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    tracing::info!("concord coordinator starting");

    match cli.command {
        Commands::Serve {
            host,
            port,
            expiry_interval,
            sweep_interval,
            snapshot,
            no_persist,
            subscription_idle_timeout,
            no_cors,
            no_request_logging,
            no_final_dump,
        } => {
            let params = ServeParams {
                host,
                port,
                expiry_interval,
                sweep_interval,
                snapshot,
                no_persist,
                subscription_idle_timeout,
                disable_cors: no_cors,
                disable_request_logging: no_request_logging,
                skip_final_dump: no_final_dump,
            };
            tracing::info!(params = ?params, "Starting serve command");

            let config = params.apply(config)?;
            commands::coordinator_server(config).await?;
        }

        Commands::Inspect { snapshot, json } => {
            let path = snapshot.unwrap_or(config.coordinator.snapshot_path);
            tracing::info!(path = %path.display(), "Starting inspect command");
            commands::inspect(&path, json).await?;
        }
    }

    tracing::info!("concord completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("concord=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("concord={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
