//! `overwatch` binary: loads configuration, starts the control plane with
//! its periodic jobs, and serves the HTTP API.

mod settings;

use clap::{Parser, Subcommand};
use overwatch_gateway::GatewayServer;
use overwatch_runtime::{ControlPlane, JobScheduler};
use overwatch_security::AuditTrail;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "overwatch", about = "Overwatch: governance control plane for autonomous agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane and its HTTP API
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let explicit = cli.config.is_some();
    let path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(settings::DEFAULT_CONFIG_PATH));
    let config = settings::load(&path, explicit, std::env::vars())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid bind address '{host}:{port}': {e}"))?;

            tokio::fs::create_dir_all(&config.server.data_dir).await?;
            let trail = Arc::new(AuditTrail::persistent(config.server.data_dir.join("trail")));
            let keyed = !config.server.operator_keys.is_empty() || !config.server.admin_keys.is_empty();

            let plane = Arc::new(ControlPlane::builder(config).with_trail(trail).build()?);
            if !keyed {
                warn!("No API keys configured; every caller is treated as admin");
            }

            let scheduler = JobScheduler::new(plane.clone())?;
            for (job, next) in scheduler.next_fire_times() {
                info!(job = job.name(), next = ?next, "Job scheduled");
            }
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handles = scheduler.spawn(shutdown_rx);

            info!(addr = %addr, "Starting Overwatch");
            GatewayServer::serve(plane, addr, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                info!("Shutdown requested");
            })
            .await?;

            shutdown_tx.send(true).ok();
            for handle in handles {
                handle.await.ok();
            }
            info!("Overwatch stopped");
        }
        Commands::Config => {
            print!("{}", settings::render(&config)?);
        }
    }

    Ok(())
}
