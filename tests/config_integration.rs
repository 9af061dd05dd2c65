//! ---
//! skylink_section: "15-testing-qa-runbook"
//! skylink_subsection: "integration-tests"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Checks that shipped configuration stays loadable and in sync."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use skylink_common::{AppConfig, LogFormat};
use skylink_proto::WireVersion;

fn path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

fn read(relative: &str) -> String {
    let full = path(relative);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn reference_config_parses_and_validates() {
    let config: AppConfig = read("configs/skylink.toml").parse().unwrap();
    assert_eq!(config.upstream.listen.port(), 14551);
    assert_eq!(config.upstream.liveness_timeout, Duration::from_secs(5));
    assert_eq!(config.upstream.handshake_timeout, None);
    assert_eq!(config.server.path, "/ws");
    assert!(config.server.allows_any_origin());
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.simulation.protocol, WireVersion::V2);
    assert_eq!(config.simulation.target, config.upstream.listen);
}

#[test]
fn reference_config_matches_built_in_defaults() {
    let shipped: AppConfig = read("configs/skylink.toml").parse().unwrap();
    let defaults = AppConfig::default();
    assert_eq!(shipped.upstream.listen, defaults.upstream.listen);
    assert_eq!(
        shipped.upstream.error_burst_threshold,
        defaults.upstream.error_burst_threshold
    );
    assert_eq!(
        shipped.upstream.reconnect_backoff,
        defaults.upstream.reconnect_backoff
    );
    assert_eq!(shipped.server.listen, defaults.server.listen);
    assert_eq!(
        shipped.hub.subscriber_capacity,
        defaults.hub.subscriber_capacity
    );
    assert_eq!(
        shipped.hub.max_consecutive_drops,
        defaults.hub.max_consecutive_drops
    );
    assert_eq!(shipped.metrics.listen, defaults.metrics.listen);
    assert_eq!(shipped.simulation.seed, defaults.simulation.seed);
    assert_eq!(shipped.simulation.rate_hz, defaults.simulation.rate_hz);
    assert_eq!(
        shipped.simulation.heartbeat_interval,
        defaults.simulation.heartbeat_interval
    );
}

#[test]
fn loader_finds_the_reference_config() {
    // Only test in this binary that reads the process environment.
    std::env::remove_var(AppConfig::ENV_CONFIG_PATH);
    let loaded = AppConfig::load_with_source(&[path("configs/missing.toml"), path("configs/skylink.toml")])
        .unwrap();
    assert_eq!(loaded.source, Some(path("configs/skylink.toml")));
}
