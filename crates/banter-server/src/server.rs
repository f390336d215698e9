use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, DEFAULT_SEND_QUEUE};
use crate::hub::{Hub, HubHandle};

/// Server configuration.
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Capacity of each client's outbound queue.
    pub max_send_queue: usize,
    /// Capacity of each of the hub's intent channels.
    pub hub_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_owned(),
            port: 8080,
            max_send_queue: DEFAULT_SEND_QUEUE,
            hub_queue_depth: 1024,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    hub: HubHandle,
    max_send_queue: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create the hub, start its run loop, and serve the router. Returns a
/// handle that keeps the background tasks alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let (hub, hub_handle) = Hub::new(config.hub_queue_depth);
    let hub_task = tokio::spawn(hub.run());

    let state = AppState {
        hub: hub_handle,
        max_send_queue: config.max_send_queue,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "relay server started");

    let server_task = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_task,
        _hub: hub_task,
    })
}

/// Handle returned by [`start`]. Keeps the server and hub tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _hub: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler. The upgraded socket goes straight to the
/// connection pump; this handler never blocks on pump execution.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client::accept_connection(state.hub, socket, state.max_send_queue))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1".to_owned(),
            port: 0,
            ..Default::default()
        }
    }

    async fn connect(port: u16) -> WsClient {
        let url = format!("ws://127.0.0.1:{port}/ws");
        let (ws, _) = connect_async(&url).await.expect("connect failed");
        ws
    }

    /// Poll /health until the hub reports `expected` members. Connecting and
    /// registering are asynchronous, so tests gate on this instead of sleeping.
    async fn wait_for_connections(port: u16, expected: usize) {
        let url = format!("http://127.0.0.1:{port}/health");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
            if body["connections"] == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "hub never reached {expected} connections, last seen {}",
                body["connections"]
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Next text frame, skipping control frames.
    async fn recv_text(ws: &mut WsClient) -> String {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout(deadline, ws.next())
                .await
                .expect("timed out waiting for a text frame")
                .expect("connection ended while waiting for a text frame")
                .expect("read error while waiting for a text frame");
            match frame {
                Message::Text(text) => return text.to_string(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// True once the server has dropped the connection (close frame, clean
    /// end, or reset).
    async fn closed_by_server(ws: &mut WsClient) -> bool {
        let deadline = Duration::from_secs(5);
        loop {
            match tokio::time::timeout(deadline, ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => {}
                Err(_) => return false,
            }
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_config()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn health_tracks_connected_clients() {
        let handle = start(test_config()).await.unwrap();

        let _a = connect(handle.port).await;
        wait_for_connections(handle.port, 1).await;

        let _b = connect(handle.port).await;
        wait_for_connections(handle.port, 2).await;
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_every_member_including_sender() {
        let handle = start(test_config()).await.unwrap();

        let mut a = connect(handle.port).await;
        let mut b = connect(handle.port).await;
        let mut c = connect(handle.port).await;
        wait_for_connections(handle.port, 3).await;

        a.send(Message::Text("hi".into())).await.unwrap();

        assert_eq!(recv_text(&mut b).await, "hi");
        assert_eq!(recv_text(&mut c).await, "hi");
        // The room relays to all current members, the sender included.
        assert_eq!(recv_text(&mut a).await, "hi");
    }

    #[tokio::test]
    async fn messages_are_sanitized_in_transit() {
        let handle = start(test_config()).await.unwrap();

        let mut a = connect(handle.port).await;
        let mut b = connect(handle.port).await;
        wait_for_connections(handle.port, 2).await;

        a.send(Message::Text("hello\nworld".into())).await.unwrap();
        assert_eq!(recv_text(&mut b).await, "hello world");

        a.send(Message::Text("  pad  \n".into())).await.unwrap();
        assert_eq!(recv_text(&mut b).await, "pad");
    }

    #[tokio::test]
    async fn oversized_message_drops_only_the_sender() {
        let handle = start(test_config()).await.unwrap();

        let mut a = connect(handle.port).await;
        let mut b = connect(handle.port).await;
        let mut c = connect(handle.port).await;
        wait_for_connections(handle.port, 3).await;

        let oversized = "x".repeat(600);
        a.send(Message::Text(oversized.into())).await.unwrap();

        assert!(closed_by_server(&mut a).await, "oversized sender was not dropped");
        wait_for_connections(handle.port, 2).await;

        // The rest of the room is unaffected and never saw the payload.
        b.send(Message::Text("still here".into())).await.unwrap();
        assert_eq!(recv_text(&mut c).await, "still here");
    }

    #[tokio::test]
    async fn disconnecting_client_is_unregistered() {
        let handle = start(test_config()).await.unwrap();

        let a = connect(handle.port).await;
        wait_for_connections(handle.port, 1).await;

        drop(a);
        wait_for_connections(handle.port, 0).await;
    }

    #[test]
    fn build_router_creates_routes() {
        let (_, hub) = Hub::new(16);
        let state = AppState {
            hub,
            max_send_queue: 32,
        };
        let _router = build_router(state);
    }
}
