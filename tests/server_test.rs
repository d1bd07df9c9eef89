//! Integration tests for the tracker HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use futures_util::{SinkExt, StreamExt};
    use rtt_tracker::config::{Config, LatencyPattern};
    use rtt_tracker::probe::SimulatedTransport;
    use rtt_tracker::server::{run, run_with_transport, RunningServer, ServerConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    const TARGET: &str = "15551234567";

    fn test_config() -> Config {
        let mut app = Config::default();
        app.simulation.connect_delay_ms = 0;
        app.simulation.patterns = vec![LatencyPattern::new(1.0, 50, 50)];
        app
    }

    async fn start_server(app: Config) -> RunningServer {
        let server = run(ServerConfig { port: 0, app })
            .await
            .expect("Failed to start server");

        // Give server and transport time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        server
    }

    async fn post(addr: &std::net::SocketAddr, path: &str, body: Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(format!("http://{}{}", addr, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to send request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Failed to parse JSON"))
    }

    async fn get(addr: &std::net::SocketAddr, path: &str) -> (u16, Value) {
        let response = reqwest::get(format!("http://{}{}", addr, path))
            .await
            .expect("Failed to send request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Failed to parse JSON"))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = start_server(test_config()).await;

        let (status, body) = get(&server.addr, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_start_rejections() {
        let server = start_server(test_config()).await;

        let (status, body) = post(&server.addr, "/api/tracking/start", json!({})).await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "MISSING_TARGET");

        let (status, body) =
            post(&server.addr, "/api/tracking/start", json!({"target": "12ab"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "INVALID_TARGET");

        let (status, body) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"target": TARGET, "interval": 10}),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["code"], "INTERVAL_OUT_OF_RANGE");
        assert!(body["error"].as_str().unwrap().contains("500ms"));

        let (_, body) = get(&server.addr, "/api/tracking/status").await;
        assert_eq!(body["count"], 0);

        server.shutdown();
    }

    async fn next_message(ws: &mut WsClient) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("Timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("Failed to parse JSON")
                }
                Some(Ok(_)) => continue,
                other => panic!("WebSocket ended: {other:?}"),
            }
        }
    }

    /// Next message of `kind`, skipping interleaved heartbeats.
    async fn next_of_type(ws: &mut WsClient, kind: &str) -> Value {
        loop {
            let message = next_message(ws).await;
            if message["type"] == kind {
                return message;
            }
            assert_eq!(message["type"], "heartbeat", "unexpected {message}");
        }
    }

    #[tokio::test]
    async fn test_malformed_body_uses_error_shape() {
        let server = start_server(test_config()).await;

        let (status, body) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"target": TARGET, "interval": "abc"}),
        )
        .await;
        assert_eq!(status, 422);
        assert_eq!(body["code"], "INVALID_REQUEST");
        assert!(body["error"].as_str().is_some());

        let (status, body) =
            post(&server.addr, "/api/tracking/stop", json!({"phoneNumber": 15551234567u64})).await;
        assert_eq!(status, 422);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (_, body) = get(&server.addr, "/api/tracking/status").await;
        assert_eq!(body["count"], 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_websocket_session() {
        let mut app = test_config();
        app.server.heartbeat = Duration::from_millis(200);
        let server = start_server(app).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
            .await
            .expect("Failed to connect WebSocket");

        let greeting = next_message(&mut ws).await;
        assert_eq!(greeting["type"], "connected");
        assert_eq!(greeting["message"], "Connected to RTT tracking server");
        assert_eq!(server.coordinator.broadcaster().observer_count(), 1);

        let beat = next_message(&mut ws).await;
        assert_eq!(beat["type"], "heartbeat");
        assert!(beat["timestamp"].as_str().is_some());

        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        next_of_type(&mut ws, "pong").await;

        ws.send(Message::Text(r#"{"type":"get-status"}"#.into())).await.unwrap();
        let status = next_of_type(&mut ws, "status").await;
        assert_eq!(status["data"]["connected"], true);
        assert_eq!(status["data"]["count"], 0);

        ws.send(Message::Text("not json".into())).await.unwrap();
        let error = next_of_type(&mut ws, "error").await;
        assert_eq!(error["message"], "Invalid message format");

        // tracked updates reach the socket
        let (status, _) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"target": TARGET, "interval": 60000}),
        )
        .await;
        assert_eq!(status, 200);
        let update = next_of_type(&mut ws, "rtt-update").await;
        assert_eq!(update["data"]["target"], TARGET);
        assert_eq!(update["data"]["elapsedMs"], 50);

        ws.close(None).await.unwrap();
        let mut remaining = 1;
        for _ in 0..50 {
            remaining = server.coordinator.broadcaster().observer_count();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = start_server(test_config()).await;

        let (status, body) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"phoneNumber": TARGET, "interval": 60000}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["target"], TARGET);
        assert_eq!(body["interval"], 60000);
        assert_eq!(body["activeTargets"], 1);

        let (status, body) =
            post(&server.addr, "/api/tracking/start", json!({"target": TARGET})).await;
        assert_eq!(status, 409);
        assert_eq!(body["code"], "ALREADY_TRACKED");

        let (status, body) = get(&server.addr, "/api/tracking/status").await;
        assert_eq!(status, 200);
        assert_eq!(body["connected"], true);
        assert_eq!(body["activeTargets"], json!([TARGET]));
        assert_eq!(body["maxTargets"], 10);

        let (status, _) = post(&server.addr, "/api/tracking/stop", json!({"target": TARGET})).await;
        assert_eq!(status, 200);

        let (status, body) =
            post(&server.addr, "/api/tracking/stop", json!({"target": TARGET})).await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "NOT_TRACKED");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let mut app = test_config();
        app.probe.max_targets = 2;
        let server = start_server(app).await;

        for target in ["15550000001", "15550000002"] {
            let (status, _) = post(
                &server.addr,
                "/api/tracking/start",
                json!({"target": target, "interval": 60000}),
            )
            .await;
            assert_eq!(status, 200);
        }

        let (status, body) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"target": "15550000003", "interval": 60000}),
        )
        .await;
        assert_eq!(status, 429);
        assert_eq!(body["code"], "CAPACITY_EXCEEDED");

        let (status, body) = get(&server.addr, "/api/tracking/stop-all").await;
        assert_eq!(status, 200);
        assert_eq!(body["stoppedCount"], 2);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_transport_not_ready() {
        let app = test_config();
        let transport = Arc::new(SimulatedTransport::new(app.simulation.clone()));
        let server = run_with_transport(ServerConfig { port: 0, app }, transport)
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, body) =
            post(&server.addr, "/api/tracking/start", json!({"target": TARGET})).await;
        assert_eq!(status, 503);
        assert_eq!(body["code"], "TRANSPORT_NOT_READY");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_analysis_endpoints() {
        let server = start_server(test_config()).await;

        let (status, body) = get(&server.addr, &format!("/api/tracking/analysis/{TARGET}")).await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "NO_DATA");

        let (status, _) = post(
            &server.addr,
            "/api/tracking/start",
            json!({"target": TARGET, "interval": 60000}),
        )
        .await;
        assert_eq!(status, 200);

        // the immediate probe answers after the fixed 50ms latency
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (status, body) = get(&server.addr, &format!("/api/tracking/analysis/{TARGET}")).await;
        assert_eq!(status, 200);
        let analysis = &body["analysis"];
        assert_eq!(analysis["target"], TARGET);
        assert_eq!(analysis["measurements"], 1);
        assert_eq!(analysis["current"]["elapsedMs"], 50);
        assert_eq!(analysis["current"]["state"], "app-active");
        assert_eq!(analysis["device"]["type"], "unknown");
        assert_eq!(analysis["trend"], "unknown");

        let (status, body) = get(&server.addr, "/api/tracking/analyses").await;
        assert_eq!(status, 200);
        assert_eq!(body["count"], 1);

        server.shutdown();
    }
}
