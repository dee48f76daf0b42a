//! `concord serve`

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::coordinator::CoordinatorServer;

/// Command-line overrides for the coordinator server
#[derive(Debug, Default, Clone)]
pub struct ServeParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub expiry_interval: Option<u64>,
    pub sweep_interval: Option<u64>,
    pub snapshot: Option<PathBuf>,
    pub no_persist: bool,
    pub subscription_idle_timeout: Option<u64>,
    pub disable_cors: bool,
    pub disable_request_logging: bool,
    pub skip_final_dump: bool,
}

impl ServeParams {
    /// Apply the overrides to a loaded configuration
    pub fn apply(self, mut config: Config) -> Result<Config> {
        let coordinator = &mut config.coordinator;

        if self.host.is_some() || self.port.is_some() {
            let host = self
                .host
                .unwrap_or_else(|| coordinator.bind_address.ip().to_string());
            let port = self.port.unwrap_or(coordinator.bind_address.port());
            coordinator.bind_address = format!("{host}:{port}")
                .parse()
                .context("Invalid bind address")?;
        }
        if let Some(secs) = self.expiry_interval {
            coordinator.expiry_interval_secs = secs;
        }
        if let Some(secs) = self.sweep_interval {
            coordinator.sweep_interval_secs = secs;
        }
        if let Some(path) = self.snapshot {
            coordinator.snapshot_path = path;
        }
        if self.no_persist {
            coordinator.persist = false;
        }
        if let Some(secs) = self.subscription_idle_timeout {
            coordinator.subscription_idle_timeout_secs = Some(secs);
        }
        if self.disable_cors {
            coordinator.enable_cors = false;
        }
        if self.disable_request_logging {
            coordinator.enable_request_logging = false;
        }
        if self.skip_final_dump {
            coordinator.final_dump_on_shutdown = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Start the coordinator server
pub async fn coordinator_server(config: Config) -> Result<()> {
    let config = config.coordinator;
    let bind_address = config.bind_address;

    let server = CoordinatorServer::new(config)
        .await
        .context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET/POST   /v1/services                         - List / create services");
    println!("  GET/PUT/DELETE /v1/services/{{id}}                - Get / replace / delete");
    println!("  POST       /v1/services/{{id}}/registry           - Register provider");
    println!("  DELETE     /v1/services/{{id}}/registry/{{h}}/{{p}} - Deregister provider");
    println!("  POST       /v1/heartbeat                        - Provider heartbeat");
    println!("  POST       /v1/services/{{id}}/subscription       - Subscribe");
    println!("  DELETE     /v1/services/{{id}}/subscription/{{t}}   - Unsubscribe");
    println!("  GET        /v1/query/{{id}}/{{token}}               - Route a query");
    println!("  GET        /v1/clusters                         - List clusters");
    println!("  GET/POST   /v1/cluster/{{id}}/services            - Cluster members / add");
    println!("  POST       /v1/cluster/{{id}}/heartbeat           - Cluster heartbeat");
    println!("  GET        /v1/stats                            - Registry stats");
    println!("  GET        /health, /health/live, /health/ready - Probes");
    println!("  GET        /metrics                             - Prometheus metrics");
    println!();
    println!("Coordinator server listening on http://{bind_address}");
    println!("Press Ctrl+C to stop.\n");

    // Start with graceful shutdown
    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Coordinator server stopped.");
    Ok(())
}
