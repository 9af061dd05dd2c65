//! ---
//! skylink_section: "15-testing-qa-runbook"
//! skylink_subsection: "integration-tests"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "End-to-end tests from synthetic vehicle to WebSocket subscriber."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use skylink_bridge::{Bridge, BridgeHandle, BroadcastHub, ConnectionState, TelemetrySnapshot};
use skylink_common::{HubConfig, ServerConfig, SimulationConfig, UpstreamConfig};
use skylink_metrics::{new_registry, spawn_http_server, BridgeMetrics, MetricsServer};
use skylink_net::{WebSocketServerBuilder, WebSocketServerHandle};
use skylink_sim::{ProducerStats, SyntheticProducer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

struct Stack {
    bridge: BridgeHandle,
    server: WebSocketServerHandle,
    metrics: MetricsServer,
    upstream: SocketAddr,
    hub: BroadcastHub,
}

impl Stack {
    async fn start() -> Self {
        let registry = new_registry();
        let bridge_metrics = BridgeMetrics::new(registry.clone()).unwrap();
        let metrics = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();

        let hub = BroadcastHub::with_metrics(HubConfig::default(), Some(bridge_metrics.clone()));
        let upstream_config = UpstreamConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            recv_timeout: Duration::from_millis(50),
            liveness_timeout: Duration::from_secs(1),
            reconnect_backoff: Duration::from_millis(200),
            ..UpstreamConfig::default()
        };
        let bridge = Bridge::new(upstream_config, hub.clone())
            .with_metrics(bridge_metrics)
            .spawn();
        let upstream = timeout(
            Duration::from_secs(2),
            bridge
                .monitor()
                .wait_for(|status| status.local_addr.is_some()),
        )
        .await
        .expect("bridge binds")
        .and_then(|status| status.local_addr)
        .expect("bound upstream address");

        let server = WebSocketServerBuilder::new(
            ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
                ..ServerConfig::default()
            },
            hub.clone(),
            bridge.monitor(),
        )
        .spawn()
        .await
        .unwrap();

        Self {
            bridge,
            server,
            metrics,
            upstream,
            hub,
        }
    }

    fn start_vehicle(&self) -> (watch::Sender<bool>, JoinHandle<anyhow::Result<ProducerStats>>) {
        let producer = SyntheticProducer::new(SimulationConfig {
            target: self.upstream,
            rate_hz: 20.0,
            heartbeat_interval: Duration::from_millis(200),
            ..SimulationConfig::default()
        })
        .unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        (stop_tx, tokio::spawn(producer.run(stop_rx)))
    }
}

fn complete(snapshot: &TelemetrySnapshot) -> bool {
    snapshot.lat.is_some()
        && snapshot.roll.is_some()
        && snapshot.voltage.is_some()
        && snapshot.battery_percent.is_some()
}

const MESSAGE_FIELDS: [&[&str]; 3] = [
    &["roll", "pitch", "yaw"],
    &["lat", "lon", "altitude", "heading", "speed"],
    &["voltage", "current", "battery_percent"],
];

fn owned_by_one_message(fields: &serde_json::Value) -> bool {
    let keys: Vec<&str> = fields
        .as_object()
        .expect("flat json object")
        .keys()
        .map(String::as_str)
        .collect();
    !keys.is_empty()
        && MESSAGE_FIELDS
            .iter()
            .any(|owned| keys.iter().all(|key| owned.contains(key)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn synthetic_vehicle_reaches_websocket_subscribers() {
    let stack = Stack::start().await;
    let (mut socket, _response) = connect_async(stack.server.url()).await.unwrap();
    // Register before anything is published so no primed state arrives.
    timeout(Duration::from_secs(2), async {
        while stack.hub.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("websocket subscriber registered");
    let (stop_vehicle, vehicle) = stack.start_vehicle();

    // Each push carries only what one message changed; the viewer keeps the merged state.
    let snapshot = timeout(Duration::from_secs(10), async {
        let mut merged = TelemetrySnapshot::default();
        loop {
            let message = socket.next().await.expect("stream open").unwrap();
            let Message::Text(payload) = message else {
                continue;
            };
            let fields: serde_json::Value = serde_json::from_str(&payload).unwrap();
            assert!(
                owned_by_one_message(&fields),
                "update mixes message kinds: {payload}"
            );
            let update: TelemetrySnapshot = serde_json::from_value(fields).unwrap();
            merged.merge(&update);
            if complete(&merged) {
                break merged;
            }
        }
    })
    .await
    .expect("complete snapshot in time");

    let origin = SimulationConfig::default();
    let lat = snapshot.lat.unwrap();
    let lon = snapshot.lon.unwrap();
    assert!((lat - origin.origin_lat).abs() <= origin.radius_deg + 1e-6);
    assert!((lon - origin.origin_lon).abs() <= origin.radius_deg + 1e-6);
    let altitude = snapshot.altitude.unwrap();
    assert!((40.0..=60.0).contains(&altitude));
    let heading = snapshot.heading.unwrap();
    assert!((0.0..360.0).contains(&heading));
    assert!(snapshot.speed.unwrap() > 0.0);
    assert_eq!(snapshot.voltage, Some(12.0));
    assert_eq!(snapshot.current, Some(10.0));
    let battery = snapshot.battery_percent.unwrap();
    assert!(battery > 0.0 && battery <= 100.0);

    let status: serde_json::Value = reqwest::get(format!(
        "http://{}/status",
        stack.server.local_addr()
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(status["state"], "connected");
    assert_eq!(status["ready"], true);
    assert_eq!(status["vehicle"]["system_id"], 1);
    assert_eq!(status["subscribers"], 1);

    let scrape = reqwest::get(format!("http://{}/metrics", stack.metrics.addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(scrape.contains("skylink_frames_decoded_total{kind=\"attitude\"}"));
    assert!(scrape.contains("skylink_link_ready 1"));

    stop_vehicle.send(true).unwrap();
    let produced = vehicle.await.unwrap().unwrap();
    assert_eq!(produced.send_errors, 0);

    let stats = stack.bridge.shutdown().await.unwrap();
    assert!(stats.frames > 0);
    assert_eq!(stats.decode_errors, 0);
    assert!(stack.hub.is_closed());

    // The hub closing ends the push channel.
    let ended = timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    stack.server.shutdown().await.unwrap();
    stack.metrics.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_recovers_when_the_vehicle_restarts() {
    let stack = Stack::start().await;
    let mut monitor = stack.bridge.monitor();
    let mut subscriber = stack.hub.register();

    let (stop_vehicle, vehicle) = stack.start_vehicle();
    timeout(
        Duration::from_secs(5),
        monitor.wait_for(|status| status.state == ConnectionState::Connected),
    )
    .await
    .unwrap();
    stop_vehicle.send(true).unwrap();
    vehicle.await.unwrap().unwrap();

    timeout(
        Duration::from_secs(5),
        monitor.wait_for(|status| status.state == ConnectionState::Faulted),
    )
    .await
    .unwrap();
    assert!(!monitor.is_ready());
    while subscriber.try_recv().is_some() {}

    let (stop_vehicle, vehicle) = stack.start_vehicle();
    timeout(
        Duration::from_secs(8),
        monitor.wait_for(|status| status.state == ConnectionState::Connected),
    )
    .await
    .unwrap();
    let snapshot = timeout(Duration::from_secs(2), subscriber.recv())
        .await
        .unwrap()
        .expect("same subscription keeps receiving");
    assert!(!snapshot.is_empty());
    assert!(monitor.status().reconnects >= 1);

    stop_vehicle.send(true).unwrap();
    vehicle.await.unwrap().unwrap();
    stack.bridge.shutdown().await.unwrap();
    stack.server.shutdown().await.unwrap();
    stack.metrics.shutdown().await.unwrap();
}
