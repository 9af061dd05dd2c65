//! ---
//! skylink_section: "01-core-functionality"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Shared primitives and utilities for the bridge runtime."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Shared configuration and logging setup for the SkyLink workspace.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, HubConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    ServerConfig, SimulationConfig, UpstreamConfig, STATUS_PATH,
};
pub use logging::{init_tracing, LogFormat};
