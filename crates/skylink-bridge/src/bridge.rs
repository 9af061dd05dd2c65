//! ---
//! skylink_section: "04-telemetry-bridge"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Telemetry bridge core."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
//! The background task tying supervisor, codec, normalizer and hub together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use skylink_common::UpstreamConfig;
use skylink_metrics::BridgeMetrics;
use skylink_proto::decode_datagram;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hub::BroadcastHub;
use crate::normalizer::Normalizer;
use crate::supervisor::{ConnectionSupervisor, LinkMonitor};

/// Totals observed by the bridge loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub datagrams: u64,
    pub frames: u64,
    pub decode_errors: u64,
    /// Well-framed messages the bridge does not use.
    pub ignored: u64,
    pub normalize_errors: u64,
    pub published: u64,
}

#[derive(Default)]
struct Counters {
    datagrams: AtomicU64,
    frames: AtomicU64,
    decode_errors: AtomicU64,
    ignored: AtomicU64,
    normalize_errors: AtomicU64,
    published: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            normalize_errors: self.normalize_errors.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
        }
    }
}

/// Builder for the bridge task.
pub struct Bridge {
    config: UpstreamConfig,
    hub: BroadcastHub,
    metrics: Option<BridgeMetrics>,
}

impl Bridge {
    pub fn new(config: UpstreamConfig, hub: BroadcastHub) -> Self {
        Self {
            config,
            hub,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the receive loop on its own task.
    pub fn spawn(self) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (supervisor, monitor) = ConnectionSupervisor::new(self.config.clone(), shutdown_rx);
        let supervisor = supervisor.with_metrics(self.metrics.clone());
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(run(
            supervisor,
            self.hub,
            self.config,
            counters.clone(),
            self.metrics,
        ));

        BridgeHandle {
            shutdown: shutdown_tx,
            task,
            monitor,
            counters,
        }
    }
}

async fn run(
    mut supervisor: ConnectionSupervisor,
    hub: BroadcastHub,
    config: UpstreamConfig,
    counters: Arc<Counters>,
    metrics: Option<BridgeMetrics>,
) {
    let mut normalizer = Normalizer::new();
    info!(listen = %config.listen, "telemetry bridge started");

    loop {
        let Some(datagram) = supervisor.recv(config.recv_timeout).await else {
            if supervisor.is_stopped() {
                break;
            }
            continue;
        };
        counters.datagrams.fetch_add(1, Ordering::Relaxed);

        for decoded in decode_datagram(&datagram) {
            match &decoded {
                Ok(packet) => {
                    counters.frames.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &metrics {
                        metrics.record_frame(packet.message.kind().as_ref());
                    }
                }
                Err(err) => {
                    if err.is_silent() {
                        counters.ignored.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Some(metrics) = &metrics {
                        metrics.record_decode_error(err.kind());
                    }
                }
            }

            let Some(message) = supervisor.admit(decoded) else {
                continue;
            };
            match normalizer.try_apply(&message) {
                Ok(Some(snapshot)) => {
                    let report = hub.publish(snapshot);
                    counters.published.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &metrics {
                        metrics.record_publish(report.dropped);
                    }
                    if report.evicted > 0 {
                        debug!(evicted = report.evicted, "subscribers evicted on publish");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "dropping telemetry message");
                    counters.normalize_errors.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &metrics {
                        metrics.record_normalize_error();
                    }
                }
            }
        }
    }

    hub.close();
    info!(stats = ?counters.snapshot(), "telemetry bridge stopped");
}

/// Control handle for a running bridge. Dropping it also stops the task.
pub struct BridgeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    monitor: LinkMonitor,
    counters: Arc<Counters>,
}

impl BridgeHandle {
    pub fn monitor(&self) -> LinkMonitor {
        self.monitor.clone()
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the loop to release the socket and close the hub.
    /// Returns the final counters.
    pub async fn shutdown(self) -> Result<BridgeStats> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|err| anyhow::anyhow!("bridge task failed: {err}"))?;
        Ok(self.counters.snapshot())
    }
}
