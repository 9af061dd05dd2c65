//! ---
//! skylink_section: "01-core-functionality"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Shared primitives and utilities for the bridge runtime."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use skylink_proto::WireVersion;
use tracing::debug;

use crate::logging::LogFormat;

/// Route served next to the push channel; the push channel may not use it.
pub const STATUS_PATH: &str = "/status";

fn default_upstream_listen() -> SocketAddr {
    "127.0.0.1:14551"
        .parse()
        .expect("valid default upstream address")
}

fn default_recv_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_error_burst_threshold() -> u32 {
    8
}

fn default_reconnect_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_liveness_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_server_listen() -> SocketAddr {
    "0.0.0.0:5000".parse().expect("valid default server address")
}

fn default_server_path() -> String {
    "/ws".to_owned()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_owned()]
}

fn default_subscriber_capacity() -> usize {
    64
}

fn default_max_consecutive_drops() -> u32 {
    256
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_sim_target() -> SocketAddr {
    default_upstream_listen()
}

fn default_sim_rate_hz() -> f64 {
    10.0
}

fn default_sim_heartbeat_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_system_id() -> u8 {
    1
}

fn default_component_id() -> u8 {
    1
}

fn default_origin_lat() -> f64 {
    12.9716
}

fn default_origin_lon() -> f64 {
    77.5946
}

fn default_radius_deg() -> f64 {
    0.002
}

fn default_angular_step() -> f64 {
    0.05
}

fn default_base_altitude() -> f64 {
    50.0
}

fn default_altitude_swing() -> f64 {
    10.0
}

fn default_simulation_seed() -> u64 {
    0x5EED_F00Du64
}

/// Primary configuration object for the SkyLink processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "SKYLINK_CONFIG";

    /// Load configuration from disk, respecting the `SKYLINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `SKYLINK_CONFIG` path must exist. Candidates are probed in order and
    /// the first existing file wins; when none exist the defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.server.validate()?;
        self.hub.validate()?;
        self.logging.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Upstream MAVLink endpoint and supervision tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_recv_timeout", rename = "recv_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub recv_timeout: Duration,
    /// Consecutive receive/decode failures tolerated before the link is faulted.
    #[serde(default = "default_error_burst_threshold")]
    pub error_burst_threshold: u32,
    #[serde(default = "default_reconnect_backoff", rename = "reconnect_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_backoff: Duration,
    /// Silence after which a connected link is considered lost.
    #[serde(default = "default_liveness_timeout", rename = "liveness_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub liveness_timeout: Duration,
    /// Optional bound on the initial heartbeat wait; unset waits forever.
    #[serde(default, rename = "handshake_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub handshake_timeout: Option<Duration>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            listen: default_upstream_listen(),
            recv_timeout: default_recv_timeout(),
            error_burst_threshold: default_error_burst_threshold(),
            reconnect_backoff: default_reconnect_backoff(),
            liveness_timeout: default_liveness_timeout(),
            handshake_timeout: None,
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recv_timeout.is_zero() {
            return Err(anyhow!("upstream recv_timeout_ms must be greater than zero"));
        }
        if self.error_burst_threshold == 0 {
            return Err(anyhow!(
                "upstream error_burst_threshold must be greater than zero"
            ));
        }
        if self.liveness_timeout <= self.recv_timeout {
            return Err(anyhow!(
                "upstream liveness_timeout_ms must exceed recv_timeout_ms"
            ));
        }
        Ok(())
    }
}

/// Push-channel server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_server_path")]
    pub path: String,
    /// Origins allowed to open a subscriber channel. `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_server_listen(),
            path: default_server_path(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(anyhow!("server path '{}' must start with '/'", self.path));
        }
        if self.path == STATUS_PATH {
            return Err(anyhow!("server path '{}' is reserved for status", self.path));
        }
        if self.allowed_origins.is_empty() {
            return Err(anyhow!(
                "server allowed_origins must list at least one origin (use \"*\" for any)"
            ));
        }
        Ok(())
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

/// Broadcast hub delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    #[serde(default = "default_max_consecutive_drops")]
    pub max_consecutive_drops: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            max_consecutive_drops: default_max_consecutive_drops(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_capacity == 0 {
            return Err(anyhow!("hub subscriber_capacity must be greater than zero"));
        }
        if self.max_consecutive_drops == 0 {
            return Err(anyhow!(
                "hub max_consecutive_drops must be greater than zero"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter directive used when neither `SKYLINK_LOG` nor `RUST_LOG` is set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(directive) = &self.filter {
            crate::logging::validate_directive(directive)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Synthetic producer settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_target")]
    pub target: SocketAddr,
    #[serde(default = "default_sim_rate_hz")]
    pub rate_hz: f64,
    #[serde(
        default = "default_sim_heartbeat_interval",
        rename = "heartbeat_interval_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_system_id")]
    pub system_id: u8,
    #[serde(default = "default_component_id")]
    pub component_id: u8,
    #[serde(default)]
    pub protocol: WireVersion,
    #[serde(default = "default_origin_lat")]
    pub origin_lat: f64,
    #[serde(default = "default_origin_lon")]
    pub origin_lon: f64,
    #[serde(default = "default_radius_deg")]
    pub radius_deg: f64,
    #[serde(default = "default_angular_step")]
    pub angular_step_rad: f64,
    #[serde(default = "default_base_altitude")]
    pub base_altitude_m: f64,
    #[serde(default = "default_altitude_swing")]
    pub altitude_swing_m: f64,
    #[serde(default)]
    pub noise_sigma: f64,
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target: default_sim_target(),
            rate_hz: default_sim_rate_hz(),
            heartbeat_interval: default_sim_heartbeat_interval(),
            system_id: default_system_id(),
            component_id: default_component_id(),
            protocol: WireVersion::default(),
            origin_lat: default_origin_lat(),
            origin_lon: default_origin_lon(),
            radius_deg: default_radius_deg(),
            angular_step_rad: default_angular_step(),
            base_altitude_m: default_base_altitude(),
            altitude_swing_m: default_altitude_swing(),
            noise_sigma: 0.0,
            seed: default_simulation_seed(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(anyhow!("simulation rate_hz must be a positive number"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!(
                "simulation heartbeat_interval_ms must be greater than zero"
            ));
        }
        if !(self.noise_sigma.is_finite() && self.noise_sigma >= 0.0) {
            return Err(anyhow!("simulation noise_sigma must be zero or positive"));
        }
        Ok(())
    }

    /// Period between telemetry ticks derived from `rate_hz`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.upstream.listen.port(), 14551);
        assert_eq!(config.server.listen.port(), 5000);
        assert!(config.server.allows_any_origin());
        assert!(config.upstream.handshake_timeout.is_none());
        assert_eq!(config.simulation.tick_interval(), Duration::from_millis(100));
        config.validate().expect("defaults validate");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = r#"
            [upstream]
            listen = "0.0.0.0:14550"
            reconnect_backoff_ms = 250
            handshake_timeout_ms = 3000

            [server]
            allowed_origins = ["http://localhost:3000"]
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.upstream.listen.port(), 14550);
        assert_eq!(config.upstream.reconnect_backoff, Duration::from_millis(250));
        assert_eq!(
            config.upstream.handshake_timeout,
            Some(Duration::from_secs(3))
        );
        assert_eq!(config.upstream.error_burst_threshold, 8);
        assert!(!config.server.allows_any_origin());
        assert_eq!(config.hub.subscriber_capacity, 64);
    }

    #[test]
    fn validation_rejects_empty_origin_list() {
        let result = "[server]\nallowed_origins = []\n".parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_liveness_below_recv_timeout() {
        let result = "[upstream]\nrecv_timeout_ms = 500\nliveness_timeout_ms = 100\n"
            .parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[hub]\nsubscriber_capacity = 4").expect("write config");
        let missing = PathBuf::from("does/not/exist.toml");
        let loaded =
            AppConfig::load_with_source(&[missing, file.path().to_path_buf()]).expect("load");
        assert_eq!(loaded.source.as_deref(), Some(file.path()));
        assert_eq!(loaded.config.hub.subscriber_capacity, 4);
    }

    #[test]
    fn protocol_accepts_wire_version_spellings() {
        let config: AppConfig = "[simulation]\nprotocol = \"v1\"".parse().expect("config parses");
        assert_eq!(config.simulation.protocol, WireVersion::V1);
        assert!("[simulation]\nprotocol = \"v3\"".parse::<AppConfig>().is_err());
        assert_eq!("2".parse::<WireVersion>(), Ok(WireVersion::V2));
    }

    #[test]
    fn invalid_logging_filter_is_rejected() {
        let result = "[logging]\nfilter = \"skylink_bridge=loud\"".parse::<AppConfig>();
        assert!(result.is_err());
        let config: AppConfig = "[logging]\nfilter = \"skylink_net=debug\""
            .parse()
            .expect("valid filter");
        assert_eq!(config.logging.filter.as_deref(), Some("skylink_net=debug"));
    }
}
