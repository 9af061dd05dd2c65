//! ---
//! skylink_section: "07-resilience-fault-tolerance"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Upstream link supervision and recovery."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! Lifecycle of the single upstream UDP link.
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHandshake -(heartbeat)-> Connected
//!                     ^                 |                            |
//!                     |                 +--------> Faulted <---------+
//!                     +---(backoff)----------------------+
//! ```
//!
//! The supervisor is driven by its owner: [`ConnectionSupervisor::recv`] performs any
//! pending bind or backoff wait and returns the next datagram, and
//! [`ConnectionSupervisor::admit`] feeds each decoded frame back so heartbeats and error
//! bursts can move the state machine.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skylink_common::UpstreamConfig;
use skylink_metrics::BridgeMetrics;
use skylink_proto::{DecodeError, FrameHeader, Packet, RawMessage, WireVersion};
use strum::{AsRefStr, Display};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::TransportError;

const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Connected,
    Faulted,
}

/// Identity of the vehicle the link handshook with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VehicleIdentity {
    pub system_id: u8,
    pub component_id: u8,
    pub protocol: WireVersion,
}

impl From<&FrameHeader> for VehicleIdentity {
    fn from(header: &FrameHeader) -> Self {
        Self {
            system_id: header.system_id,
            component_id: header.component_id,
            protocol: header.version,
        }
    }
}

/// Observable projection of the supervisor state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub ready: bool,
    pub last_error: Option<String>,
    pub local_addr: Option<SocketAddr>,
    pub vehicle: Option<VehicleIdentity>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub reconnects: u64,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            ready: false,
            last_error: None,
            local_addr: None,
            vehicle: None,
            last_heartbeat: None,
            reconnects: 0,
        }
    }
}

/// Read-only view of the link, safe to clone into the serving layer.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    rx: watch::Receiver<LinkStatus>,
}

impl LinkMonitor {
    pub fn status(&self) -> LinkStatus {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().ready
    }

    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    /// Wait until `predicate` holds; `None` if the supervisor is gone first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<LinkStatus>
    where
        F: FnMut(&LinkStatus) -> bool,
    {
        self.rx
            .wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|status| status.clone())
    }
}

enum Wake {
    Datagram(std::io::Result<usize>),
    Shutdown,
    Timer,
}

pub struct ConnectionSupervisor {
    config: UpstreamConfig,
    socket: Option<UdpSocket>,
    bound_addr: Option<SocketAddr>,
    state: ConnectionState,
    status_tx: watch::Sender<LinkStatus>,
    shutdown: watch::Receiver<bool>,
    stopped: bool,
    error_streak: u32,
    retry_at: Option<Instant>,
    handshake_started: Option<Instant>,
    last_heartbeat: Option<Instant>,
    binds: u64,
    buffer: Vec<u8>,
    metrics: Option<BridgeMetrics>,
}

impl ConnectionSupervisor {
    pub fn new(config: UpstreamConfig, shutdown: watch::Receiver<bool>) -> (Self, LinkMonitor) {
        let (status_tx, rx) = watch::channel(LinkStatus::default());
        let supervisor = Self {
            config,
            socket: None,
            bound_addr: None,
            state: ConnectionState::Disconnected,
            status_tx,
            shutdown,
            stopped: false,
            error_streak: 0,
            retry_at: None,
            handshake_started: None,
            last_heartbeat: None,
            binds: 0,
            buffer: vec![0; MAX_DATAGRAM],
            metrics: None,
        };
        (supervisor, LinkMonitor { rx })
    }

    pub fn with_metrics(mut self, metrics: Option<BridgeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether shutdown has been observed; `recv` will keep returning `None`.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn monitor(&self) -> LinkMonitor {
        LinkMonitor {
            rx: self.status_tx.subscribe(),
        }
    }

    /// Wait for the next datagram for at most `timeout`.
    ///
    /// Binding, reconnect backoff and liveness checks all happen inside this call. Returns
    /// `None` on timeout, on shutdown and after a transport error.
    pub async fn recv(&mut self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stopped || *self.shutdown.borrow() {
                self.stop();
                return None;
            }
            let now = Instant::now();
            self.check_deadlines(now);

            match self.state {
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.connect().await;
                    continue;
                }
                ConnectionState::Faulted => {
                    let retry_at = self.retry_at.unwrap_or(now);
                    if now >= retry_at {
                        self.set_state(ConnectionState::Connecting);
                        continue;
                    }
                    if now >= deadline {
                        return None;
                    }
                    let wake = retry_at.min(deadline);
                    let woke = tokio::select! {
                        biased;
                        changed = self.shutdown.changed() => Self::shutdown_wake(changed),
                        _ = sleep_until(wake) => Wake::Timer,
                    };
                    if matches!(woke, Wake::Shutdown) {
                        self.stopped = true;
                    }
                }
                ConnectionState::AwaitingHandshake | ConnectionState::Connected => {
                    if now >= deadline {
                        return None;
                    }
                    let wake = self.next_check(now).map_or(deadline, |at| at.min(deadline));
                    let Some(socket) = self.socket.as_ref() else {
                        self.set_state(ConnectionState::Connecting);
                        continue;
                    };
                    let woke = tokio::select! {
                        biased;
                        changed = self.shutdown.changed() => Self::shutdown_wake(changed),
                        received = socket.recv_from(&mut self.buffer) => {
                            Wake::Datagram(received.map(|(len, _peer)| len))
                        }
                        _ = sleep_until(wake) => Wake::Timer,
                    };
                    match woke {
                        Wake::Datagram(Ok(len)) => {
                            return Some(Bytes::copy_from_slice(&self.buffer[..len]));
                        }
                        Wake::Datagram(Err(err)) => {
                            let err = TransportError::Receive(err);
                            warn!(error = %err, "upstream receive failed");
                            self.record_error(err.to_string());
                            return None;
                        }
                        Wake::Shutdown => self.stopped = true,
                        Wake::Timer => {}
                    }
                }
            }
        }
    }

    /// Feed one decode result through the state machine.
    ///
    /// Returns the message when it should reach the normalizer: everything once the link
    /// is connected, nothing before the first heartbeat.
    pub fn admit(&mut self, decoded: Result<Packet, DecodeError>) -> Option<RawMessage> {
        if !matches!(
            self.state,
            ConnectionState::AwaitingHandshake | ConnectionState::Connected
        ) {
            return None;
        }
        match decoded {
            Ok(packet) => {
                self.error_streak = 0;
                if let RawMessage::Heartbeat(_) = packet.message {
                    self.on_heartbeat(&packet.header);
                }
                if self.state == ConnectionState::Connected {
                    Some(packet.message)
                } else {
                    debug!(kind = %packet.message.kind(), "ignoring message before handshake");
                    None
                }
            }
            Err(err) if err.is_silent() => {
                debug!(error = %err, "skipping unsupported frame");
                None
            }
            Err(err) => {
                debug!(error = %err, streak = self.error_streak + 1, "malformed upstream frame");
                self.record_error(err.to_string());
                None
            }
        }
    }

    /// Close the socket and settle in `Disconnected`.
    pub fn stop(&mut self) {
        self.stopped = true;
        if self.state == ConnectionState::Disconnected && self.socket.is_none() {
            return;
        }
        self.socket = None;
        self.state = ConnectionState::Disconnected;
        info!("upstream link stopped");
        self.publish(|status| {
            status.state = ConnectionState::Disconnected;
            status.ready = false;
        });
    }

    /// The flag itself is re-read at the top of the `recv` loop; a dropped sender counts
    /// as shutdown.
    fn shutdown_wake(changed: Result<(), watch::error::RecvError>) -> Wake {
        match changed {
            Ok(()) => Wake::Timer,
            Err(_) => Wake::Shutdown,
        }
    }

    async fn connect(&mut self) {
        self.set_state(ConnectionState::Connecting);
        let addr = self.bound_addr.unwrap_or(self.config.listen);
        let bound = match UdpSocket::bind(addr).await {
            Ok(socket) => socket.local_addr().map(|local| (socket, local)),
            Err(err) => Err(err),
        };
        match bound {
            Ok((socket, local)) => {
                self.binds += 1;
                let reconnect = self.binds > 1;
                if reconnect {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconnect();
                    }
                }
                self.bound_addr = Some(local);
                self.socket = Some(socket);
                self.error_streak = 0;
                self.retry_at = None;
                self.last_heartbeat = None;
                self.handshake_started = Some(Instant::now());
                self.state = ConnectionState::AwaitingHandshake;
                info!(address = %local, reconnect, "upstream socket bound; awaiting heartbeat");
                let reconnects = self.binds.saturating_sub(1);
                self.publish(|status| {
                    status.state = ConnectionState::AwaitingHandshake;
                    status.ready = false;
                    status.local_addr = Some(local);
                    status.reconnects = reconnects;
                });
            }
            Err(source) => {
                let err = TransportError::Bind { addr, source };
                self.fault(err.to_string());
            }
        }
    }

    fn on_heartbeat(&mut self, header: &FrameHeader) {
        self.last_heartbeat = Some(Instant::now());
        let vehicle = VehicleIdentity::from(header);
        let seen_at = Utc::now();
        if self.state == ConnectionState::AwaitingHandshake {
            self.state = ConnectionState::Connected;
            info!(
                system_id = vehicle.system_id,
                component_id = vehicle.component_id,
                protocol = %vehicle.protocol,
                "upstream link connected"
            );
            self.publish(|status| {
                status.state = ConnectionState::Connected;
                status.ready = true;
                status.last_error = None;
                status.vehicle = Some(vehicle);
                status.last_heartbeat = Some(seen_at);
            });
        } else {
            self.publish(|status| {
                status.vehicle = Some(vehicle);
                status.last_heartbeat = Some(seen_at);
            });
        }
    }

    /// Count a receive or framing failure against the burst threshold.
    fn record_error(&mut self, message: String) {
        self.error_streak += 1;
        if self.error_streak > self.config.error_burst_threshold {
            let reason = format!(
                "{} consecutive upstream errors, last: {message}",
                self.error_streak
            );
            self.fault(reason);
        }
    }

    fn check_deadlines(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connected => {
                let last = self.last_heartbeat.unwrap_or(now);
                if now.duration_since(last) >= self.config.liveness_timeout {
                    self.fault(format!(
                        "no heartbeat for {} ms",
                        self.config.liveness_timeout.as_millis()
                    ));
                }
            }
            ConnectionState::AwaitingHandshake => {
                if let (Some(limit), Some(started)) =
                    (self.config.handshake_timeout, self.handshake_started)
                {
                    if now.duration_since(started) >= limit {
                        self.fault(format!(
                            "vehicle offline: no heartbeat within {} ms",
                            limit.as_millis()
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    fn next_check(&self, now: Instant) -> Option<Instant> {
        let at = match self.state {
            ConnectionState::Connected => self
                .last_heartbeat
                .map(|last| last + self.config.liveness_timeout),
            ConnectionState::AwaitingHandshake => self
                .config
                .handshake_timeout
                .zip(self.handshake_started)
                .map(|(limit, started)| started + limit),
            _ => None,
        };
        at.map(|at| at.max(now))
    }

    fn fault(&mut self, reason: String) {
        warn!(
            previous = %self.state,
            reason = %reason,
            backoff_ms = self.config.reconnect_backoff.as_millis() as u64,
            "upstream link faulted"
        );
        self.socket = None;
        self.state = ConnectionState::Faulted;
        self.error_streak = 0;
        self.retry_at = Some(Instant::now() + self.config.reconnect_backoff);
        self.publish(|status| {
            status.state = ConnectionState::Faulted;
            status.ready = false;
            status.last_error = Some(reason);
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.publish(|status| {
            status.state = state;
            status.ready = state == ConnectionState::Connected;
        });
    }

    fn publish(&self, update: impl FnOnce(&mut LinkStatus)) {
        self.status_tx.send_modify(update);
        if let Some(metrics) = &self.metrics {
            metrics.set_link_ready(self.state == ConnectionState::Connected);
        }
    }
}
