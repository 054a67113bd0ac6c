//! Downstream listener and health endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::hub::HubHandle;
use crate::metrics::GatewayMetrics;
use crate::pump::Pump;

/// Bind the downstream listen socket; failure is fatal
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::StartupFailure(format!("failed to bind {}: {}", addr, e)))?;
    info!(addr = %addr, "Listening for WebSocket connections");
    Ok(listener)
}

/// Accept clients forever, one pump per connection
pub async fn serve(listener: TcpListener, pump: Pump) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let pump = pump.clone();
        tokio::spawn(async move {
            handle_connection(stream, pump, peer).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, pump: Pump, peer: std::net::SocketAddr) {
    debug!(peer = %peer, "Handling incoming connection");

    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Could not disable Nagle");
    }

    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    pump.run(ws, Some(peer)).await;
}

/// State served by the health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub hub: HubHandle,
    pub metrics: Arc<GatewayMetrics>,
}

/// Start HTTP server for health checks and metrics
pub async fn start_health_server(addr: &str, state: HealthState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "Starting health check server");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let connections = state.hub.connection_count().await.ok();
    let feed_connected = state.metrics.feed_connected.get() == 1;

    let (status, code) = if connections.is_some() && feed_connected {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "component": "order-gateway",
            "connections": connections,
            "feed_connected": feed_connected,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn metrics(State(state): State<HealthState>) -> (StatusCode, String) {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, InboundRoute};
    use crate::feed::{MemoryFeed, OrderForwarder};
    use crate::hub::Hub;
    use crate::pump::{Inbound, PumpSettings};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_bind_failure_is_startup_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        assert!(matches!(
            bind(&addr).await,
            Err(GatewayError::StartupFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_health_degrades_when_feed_is_down() {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let (hub_loop, hub) = Hub::new(metrics.clone());
        tokio::spawn(hub_loop.run());
        let state = HealthState {
            hub,
            metrics: metrics.clone(),
        };

        metrics.feed_connected.set(1);
        let (code, Json(body)) = health_check(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);

        metrics.feed_connected.set(0);
        let (code, Json(body)) = health_check(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["feed_connected"], false);
    }

    #[tokio::test]
    async fn test_accepts_websocket_clients() {
        let config = Config::default();
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let (hub_loop, hub) = Hub::new(metrics.clone());
        tokio::spawn(hub_loop.run());

        let forwarder = OrderForwarder::new(Box::new(MemoryFeed::new().publication()), metrics.clone());
        let pump = Pump::new(
            hub.clone(),
            Inbound::from_route(InboundRoute::OrderEntry, forwarder),
            metrics,
            PumpSettings::from(&config),
        );

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, pump));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/subscribe", addr))
            .await
            .unwrap();
        while hub.connection_count().await.unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        hub.broadcast(Bytes::from_static(b"Eexec")).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Binary(b"Eexec".to_vec()));
    }
}
