//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Upstream MAVLink link to subscriber fan-out.
//!
//! Data flows `ConnectionSupervisor -> skylink_proto -> Normalizer -> BroadcastHub`, all
//! on the single task started by [`Bridge::spawn`].

pub mod bridge;
pub mod error;
pub mod hub;
pub mod normalizer;
pub mod snapshot;
pub mod supervisor;

pub use bridge::{Bridge, BridgeHandle, BridgeStats};
pub use error::{NormalizeError, TransportError};
pub use hub::{BroadcastHub, HubStats, PublishReport, SubscriberHandle, SubscriberId};
pub use normalizer::Normalizer;
pub use snapshot::TelemetrySnapshot;
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, LinkMonitor, LinkStatus, VehicleIdentity,
};
