//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::io;
use std::net::SocketAddr;

use skylink_proto::MessageKind;
use thiserror::Error;

/// Failures of the upstream socket. Always transient: the supervisor faults the link and
/// retries after the configured backoff.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind upstream socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to receive from upstream socket: {0}")]
    Receive(#[source] io::Error),
}

/// A decoded message carried values that cannot be placed in a snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("{kind} field `{field}` is not finite ({value})")]
    NonFinite {
        kind: MessageKind,
        field: &'static str,
        value: f64,
    },
}
