//! ---
//! skylink_section: "05-networking-external-interfaces"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Network connectivity and edge adapters."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Subscriber-facing HTTP surface: the WebSocket push channel and `GET /status`.

pub mod websocket;

pub use websocket::{WebSocketServerBuilder, WebSocketServerHandle};
