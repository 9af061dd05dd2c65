//! ---
//! skylink_section: "01-core-functionality"
//! skylink_subsection: "binary"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Binary entrypoint for the SkyLink daemon."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use skylink_bridge::{Bridge, BroadcastHub};
use skylink_common::{init_tracing, AppConfig, LogFormat};
use skylink_metrics::{new_registry, spawn_http_server, BridgeMetrics};
use skylink_net::WebSocketServerBuilder;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "SkyLink telemetry bridge daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the upstream UDP listen address")]
    upstream: Option<SocketAddr>,

    #[arg(long, value_name = "ADDR", help = "Override the WebSocket listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Stdout log format (pretty or json)")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load_with_source(&config_candidates(&cli))?;
    let config = apply_overrides(loaded.config, &cli)?;

    init_tracing("skylinkd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    let (metrics_server, bridge_metrics) = if config.metrics.enabled {
        let registry = new_registry();
        let bridge_metrics = BridgeMetrics::new(registry.clone())?;
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        (Some(server), Some(bridge_metrics))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let hub = BroadcastHub::with_metrics(config.hub.clone(), bridge_metrics.clone());
    let mut bridge = Bridge::new(config.upstream.clone(), hub.clone());
    if let Some(metrics) = bridge_metrics {
        bridge = bridge.with_metrics(metrics);
    }
    let bridge = bridge.spawn();

    let server =
        match WebSocketServerBuilder::new(config.server.clone(), hub, bridge.monitor())
            .spawn()
            .await
        {
            Ok(server) => server,
            Err(err) => {
                error!(error = %err, "failed to start websocket server");
                bridge.shutdown().await?;
                if let Some(metrics) = metrics_server {
                    metrics.shutdown().await?;
                }
                return Err(err);
            }
        };

    info!(url = %server.url(), upstream = %config.upstream.listen, "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    // Closing the hub first ends every client loop with a Close frame.
    let stats = bridge.shutdown().await?;
    info!(
        frames = stats.frames,
        published = stats.published,
        decode_errors = stats.decode_errors,
        "bridge stopped"
    );
    server.shutdown().await?;

    if let Some(metrics) = metrics_server {
        metrics.shutdown().await?;
    }

    Ok(())
}

fn config_candidates(cli: &Cli) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/skylink.toml"));
    candidates
}

fn apply_overrides(mut config: AppConfig, cli: &Cli) -> Result<AppConfig> {
    if let Some(upstream) = cli.upstream {
        config.upstream.listen = upstream;
    }
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;
    Ok(config)
}
