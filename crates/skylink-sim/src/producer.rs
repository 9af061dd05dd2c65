//! ---
//! skylink_section: "11-simulation"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "UDP producer streaming synthetic MAVLink telemetry."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context, Result};
use serde::Serialize;
use skylink_common::SimulationConfig;
use skylink_proto::{FrameEncoder, RawMessage};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::model::{heartbeat, FlightModel};

/// Counters reported when the producer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    pub ticks: u64,
    pub heartbeats: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
}

/// Streams heartbeats and flight telemetry to a single UDP target.
#[derive(Debug)]
pub struct SyntheticProducer {
    config: SimulationConfig,
    model: FlightModel,
    encoder: FrameEncoder,
    stats: ProducerStats,
}

impl SyntheticProducer {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let encoder = FrameEncoder::new(
            config.protocol,
            config.system_id,
            config.component_id,
        );
        let model = FlightModel::new(config.clone())?;
        Ok(Self {
            config,
            model,
            encoder,
            stats: ProducerStats::default(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.config.target
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ProducerStats> {
        let bind_addr = match self.config.target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind producer socket on {bind_addr}"))?;

        info!(
            destination = %self.config.target,
            rate_hz = self.config.rate_hz,
            protocol = %self.encoder.version(),
            system_id = self.config.system_id,
            "synthetic producer started"
        );

        // The first tick of each interval fires immediately, so a heartbeat
        // leads the stream.
        let mut heartbeats = paced(self.config.heartbeat_interval);
        let mut telemetry = paced(self.config.tick_interval());

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = heartbeats.tick() => {
                    self.send(&socket, &heartbeat()).await;
                    self.stats.heartbeats += 1;
                }
                _ = telemetry.tick() => {
                    let sample = self.model.step();
                    for message in sample.messages() {
                        self.send(&socket, &message).await;
                    }
                    self.stats.ticks = self.model.ticks();
                }
            }
        }

        info!(
            ticks = self.stats.ticks,
            frames = self.stats.frames_sent,
            send_errors = self.stats.send_errors,
            "synthetic producer stopped"
        );
        Ok(self.stats)
    }

    async fn send(&mut self, socket: &UdpSocket, message: &RawMessage) {
        let frame = self.encoder.encode(message);
        match socket.send_to(&frame, self.config.target).await {
            Ok(_) => {
                self.stats.frames_sent += 1;
                debug!(kind = %message.kind(), len = frame.len(), "frame sent");
            }
            Err(err) => {
                self.stats.send_errors += 1;
                warn!(destination = %self.config.target, error = %err, "failed to send frame");
            }
        }
    }
}

fn paced(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_proto::{decode_datagram, MessageKind, WireVersion, MAGIC_V1};
    use tokio::time::timeout;

    async fn receiver() -> (UdpSocket, SimulationConfig) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = SimulationConfig {
            target: socket.local_addr().unwrap(),
            rate_hz: 50.0,
            heartbeat_interval: Duration::from_millis(100),
            ..SimulationConfig::default()
        };
        (socket, config)
    }

    async fn next_datagram(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("datagram in time")
            .unwrap();
        buf.truncate(len);
        buf
    }

    #[tokio::test]
    async fn streams_heartbeat_then_telemetry() {
        let (socket, config) = receiver().await;
        let producer = SyntheticProducer::new(config).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(producer.run(stop_rx));

        let mut kinds = Vec::new();
        let mut sequences = Vec::new();
        while kinds.len() < 10 {
            let datagram = next_datagram(&socket).await;
            for packet in decode_datagram(&datagram) {
                let packet = packet.expect("producer emits valid frames");
                assert_eq!(packet.header.system_id, 1);
                sequences.push(packet.header.sequence);
                kinds.push(packet.message.kind());
            }
        }
        assert_eq!(kinds[0], MessageKind::Heartbeat);
        let telemetry: Vec<_> = kinds
            .iter()
            .copied()
            .filter(|kind| *kind != MessageKind::Heartbeat)
            .take(3)
            .collect();
        assert_eq!(
            telemetry,
            vec![
                MessageKind::GlobalPosition,
                MessageKind::Attitude,
                MessageKind::SystemStatus
            ]
        );
        for pair in sequences.windows(2) {
            assert_eq!(pair[1], pair[0].wrapping_add(1));
        }

        stop_tx.send(true).unwrap();
        let stats = timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(stats.heartbeats >= 1);
        assert!(stats.ticks >= 3);
        assert_eq!(stats.send_errors, 0);
        assert_eq!(stats.frames_sent, stats.heartbeats + stats.ticks * 3);
    }

    #[tokio::test]
    async fn honours_v1_framing() {
        let (socket, mut config) = receiver().await;
        config.protocol = WireVersion::V1;
        let producer = SyntheticProducer::new(config).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(producer.run(stop_rx));

        let datagram = next_datagram(&socket).await;
        assert_eq!(datagram[0], MAGIC_V1);

        drop(stop_tx);
        timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn rejects_invalid_rate() {
        let config = SimulationConfig {
            rate_hz: 0.0,
            ..SimulationConfig::default()
        };
        assert!(SyntheticProducer::new(config).is_err());
    }
}
