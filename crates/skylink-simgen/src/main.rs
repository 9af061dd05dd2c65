//! ---
//! skylink_section: "11-simulation"
//! skylink_subsection: "binary"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Synthetic vehicle CLI streaming MAVLink telemetry over UDP."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use skylink_common::{init_tracing, AppConfig, SimulationConfig};
use skylink_proto::WireVersion;
use skylink_sim::SyntheticProducer;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stream synthetic MAVLink telemetry to a SkyLink bridge",
    long_about = None
)]
struct Cli {
    /// Configuration file providing the [simulation] defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// UDP address of the bridge's upstream socket
    #[arg(long)]
    target: Option<SocketAddr>,

    /// Telemetry ticks per second
    #[arg(long)]
    rate_hz: Option<f64>,

    /// Interval between heartbeats in milliseconds
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// MAVLink framing to emit (v1 or v2)
    #[arg(long)]
    protocol: Option<WireVersion>,

    /// System id stamped on every frame
    #[arg(long)]
    system_id: Option<u8>,

    /// Random seed for the position noise
    #[arg(long)]
    seed: Option<u64>,

    /// Position and altitude noise sigma in meters (0 disables noise)
    #[arg(long)]
    noise: Option<f64>,

    /// Stop after this many seconds instead of waiting for ctrl-c
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing("skylink-simgen", &config.logging)?;

    let simulation = apply_overrides(config.simulation, &cli)?;
    let duration = run_duration(&cli)?;
    let producer = SyntheticProducer::new(simulation)?;
    let target = producer.target();

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut task = tokio::spawn(producer.run(stop_rx));

    tokio::select! {
        result = &mut task => {
            // The producer only returns early on a startup failure.
            let stats = result.context("producer task panicked")??;
            return Err(anyhow!("producer stopped unexpectedly after {} ticks", stats.ticks));
        }
        _ = wait_for_stop(duration) => {}
    }

    let _ = stop_tx.send(true);
    let stats = task.await.context("producer task panicked")??;
    info!(destination = %target, ticks = stats.ticks, "simulation finished");
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/skylink.toml"));
    Ok(AppConfig::load_with_source(&candidates)?.config)
}

fn apply_overrides(mut simulation: SimulationConfig, cli: &Cli) -> Result<SimulationConfig> {
    if let Some(target) = cli.target {
        simulation.target = target;
    }
    if let Some(rate_hz) = cli.rate_hz {
        simulation.rate_hz = rate_hz;
    }
    if let Some(heartbeat_ms) = cli.heartbeat_ms {
        simulation.heartbeat_interval = Duration::from_millis(heartbeat_ms);
    }
    if let Some(protocol) = cli.protocol {
        simulation.protocol = protocol;
    }
    if let Some(system_id) = cli.system_id {
        simulation.system_id = system_id;
    }
    if let Some(seed) = cli.seed {
        simulation.seed = seed;
    }
    if let Some(noise) = cli.noise {
        simulation.noise_sigma = noise;
    }
    simulation.validate()?;
    Ok(simulation)
}

fn run_duration(cli: &Cli) -> Result<Option<Duration>> {
    match cli.duration_secs {
        Some(0) => Err(anyhow!("duration-secs must be greater than zero")),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

async fn wait_for_stop(duration: Option<Duration>) {
    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => info!(?duration, "duration elapsed; stopping"),
                _ = signal::ctrl_c() => info!("ctrl-c received; stopping"),
            }
        }
        None => {
            let _ = signal::ctrl_c().await;
            info!("ctrl-c received; stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base_cli() -> Cli {
        Cli {
            config: None,
            target: None,
            rate_hz: None,
            heartbeat_ms: None,
            protocol: None,
            system_id: None,
            seed: None,
            noise: None,
            duration_secs: None,
        }
    }

    #[test]
    fn overrides_leave_defaults_untouched() {
        let simulation = apply_overrides(SimulationConfig::default(), &base_cli()).unwrap();
        assert_eq!(simulation.rate_hz, 10.0);
        assert_eq!(simulation.protocol, WireVersion::V2);
        assert_eq!(simulation.heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn overrides_replace_configured_values() {
        let mut cli = base_cli();
        cli.target = Some("127.0.0.1:15000".parse().unwrap());
        cli.rate_hz = Some(25.0);
        cli.heartbeat_ms = Some(250);
        cli.protocol = Some(WireVersion::V1);
        cli.system_id = Some(42);
        cli.noise = Some(0.3);
        let simulation = apply_overrides(SimulationConfig::default(), &cli).unwrap();
        assert_eq!(simulation.target.port(), 15000);
        assert_eq!(simulation.rate_hz, 25.0);
        assert_eq!(simulation.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(simulation.protocol, WireVersion::V1);
        assert_eq!(simulation.system_id, 42);
        assert_eq!(simulation.noise_sigma, 0.3);
    }

    #[test]
    fn overrides_are_validated() {
        let mut cli = base_cli();
        cli.rate_hz = Some(0.0);
        assert!(apply_overrides(SimulationConfig::default(), &cli).is_err());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut cli = base_cli();
        cli.duration_secs = Some(0);
        assert!(run_duration(&cli).is_err());
        cli.duration_secs = Some(5);
        assert_eq!(run_duration(&cli).unwrap(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn protocol_flag_parses() {
        let cli = Cli::try_parse_from(["skylink-simgen", "--protocol", "v1", "--rate-hz", "5"])
            .unwrap();
        assert_eq!(cli.protocol, Some(WireVersion::V1));
        assert_eq!(cli.rate_hz, Some(5.0));
    }

    #[test]
    fn config_file_supplies_simulation_section() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[simulation]\ntarget = \"127.0.0.1:16000\"\nrate_hz = 20.0\nprotocol = \"v1\""
        )
        .unwrap();
        let mut cli = base_cli();
        cli.config = Some(file.path().to_path_buf());
        let config = load_config(&cli).unwrap();
        assert_eq!(config.simulation.target.port(), 16000);
        assert_eq!(config.simulation.protocol, WireVersion::V1);
    }
}
