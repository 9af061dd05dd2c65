//! ---
//! skylink_section: "03-logging-metrics"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Metrics collection and export utilities."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the exporter actually bound (resolves port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges updated by the bridge loop and the broadcast hub.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    frames_decoded: IntCounterVec,
    decode_errors: IntCounterVec,
    normalize_errors: IntCounter,
    snapshots_published: IntCounter,
    samples_dropped: IntCounter,
    subscribers: IntGauge,
    link_ready: IntGauge,
    reconnects: IntCounter,
}

impl BridgeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames_decoded = IntCounterVec::new(
            Opts::new(
                "skylink_frames_decoded_total",
                "Frames decoded from the upstream link by message kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(frames_decoded.clone()))?;

        let decode_errors = IntCounterVec::new(
            Opts::new(
                "skylink_decode_errors_total",
                "Frames rejected by the codec by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(decode_errors.clone()))?;

        let normalize_errors = IntCounter::with_opts(Opts::new(
            "skylink_normalize_errors_total",
            "Decoded messages dropped because their values could not be normalised",
        ))?;
        registry.register(Box::new(normalize_errors.clone()))?;

        let snapshots_published = IntCounter::with_opts(Opts::new(
            "skylink_snapshots_published_total",
            "Telemetry snapshots handed to the broadcast hub",
        ))?;
        registry.register(Box::new(snapshots_published.clone()))?;

        let samples_dropped = IntCounter::with_opts(Opts::new(
            "skylink_samples_dropped_total",
            "Per-subscriber samples dropped because the subscriber queue was full",
        ))?;
        registry.register(Box::new(samples_dropped.clone()))?;

        let subscribers = IntGauge::with_opts(Opts::new(
            "skylink_subscribers",
            "Subscribers currently registered with the broadcast hub",
        ))?;
        registry.register(Box::new(subscribers.clone()))?;

        let link_ready = IntGauge::with_opts(Opts::new(
            "skylink_link_ready",
            "Indicator (0/1) whether the upstream link has completed its handshake",
        ))?;
        registry.register(Box::new(link_ready.clone()))?;

        let reconnects = IntCounter::with_opts(Opts::new(
            "skylink_reconnects_total",
            "Times the upstream socket was rebound after a fault",
        ))?;
        registry.register(Box::new(reconnects.clone()))?;

        Ok(Self {
            registry,
            frames_decoded,
            decode_errors,
            normalize_errors,
            snapshots_published,
            samples_dropped,
            subscribers,
            link_ready,
            reconnects,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_frame(&self, kind: &str) {
        self.frames_decoded.with_label_values(&[kind]).inc();
    }

    pub fn record_decode_error(&self, kind: &str) {
        self.decode_errors.with_label_values(&[kind]).inc();
    }

    pub fn record_normalize_error(&self) {
        self.normalize_errors.inc();
    }

    pub fn record_publish(&self, dropped: usize) {
        self.snapshots_published.inc();
        if dropped > 0 {
            self.samples_dropped.inc_by(dropped as u64);
        }
    }

    pub fn set_subscribers(&self, count: usize) {
        self.subscribers.set(count as i64);
    }

    pub fn set_link_ready(&self, ready: bool) {
        self.link_ready.set(if ready { 1 } else { 0 });
    }

    pub fn record_reconnect(&self) {
        self.reconnects.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_value(registry: &Registry, name: &str) -> Option<f64> {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .and_then(|family| family.get_metric().first().cloned())
            .map(|metric| {
                if metric.has_counter() {
                    metric.get_counter().get_value()
                } else {
                    metric.get_gauge().get_value()
                }
            })
    }

    #[test]
    fn bridge_metrics_track_publishes_and_drops() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.record_publish(0);
        metrics.record_publish(3);
        metrics.set_link_ready(true);
        metrics.set_subscribers(2);

        assert_eq!(sample_value(&registry, "skylink_snapshots_published_total"), Some(2.0));
        assert_eq!(sample_value(&registry, "skylink_samples_dropped_total"), Some(3.0));
        assert_eq!(sample_value(&registry, "skylink_link_ready"), Some(1.0));
        assert_eq!(sample_value(&registry, "skylink_subscribers"), Some(2.0));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = new_registry();
        BridgeMetrics::new(registry.clone()).unwrap();
        assert!(BridgeMetrics::new(registry).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exporter_serves_text_format() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.record_frame("attitude");
        metrics.record_decode_error("checksum");

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("skylink_frames_decoded_total{kind=\"attitude\"} 1"));
        assert!(body.contains("skylink_decode_errors_total{kind=\"checksum\"} 1"));
        server.shutdown().await.unwrap();
    }
}
