//! ---
//! skylink_section: "11-simulation"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Simulation runtime module exports and shared types."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Synthetic vehicle for exercising the bridge without hardware.
//!
//! [`FlightModel`] flies a circular orbit and [`SyntheticProducer`] streams it
//! as MAVLink frames over UDP, heartbeats included.

pub mod model;
pub mod producer;

pub use model::{heartbeat, FlightModel, FlightSample};
pub use producer::{ProducerStats, SyntheticProducer};
