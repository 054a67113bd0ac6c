//! Order Gateway
//!
//! WebSocket front end for the matching engine: accepts client connections,
//! publishes their orders to the feed and broadcasts the resulting events.

use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_gateway::server::{self, HealthState};
use order_gateway::{
    Config, FeedBridge, GatewayMetrics, Hub, Inbound, OrderForwarder, Pump, PumpSettings, TcpFeed,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Order Gateway");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        listen_addr = %config.listen_addr,
        feed_endpoint = %config.feed_endpoint,
        inbound_route = ?config.inbound_route,
        "Configuration loaded"
    );

    let metrics = Arc::new(GatewayMetrics::new()?);

    // Upstream connect and listen bind are fatal on failure
    let (feed, subscription, publication) = TcpFeed::connect(&config).await?;
    let listener = server::bind(&config.listen_addr).await?;

    let (hub, hub_handle) = Hub::new(metrics.clone());
    let hub_task = tokio::spawn(hub.run());

    let bridge = FeedBridge::new(subscription, hub_handle.clone(), metrics.clone(), &config);
    let forwarder = OrderForwarder::new(Box::new(publication), metrics.clone());

    let pump = Pump::new(
        hub_handle.clone(),
        Inbound::from_route(config.inbound_route, forwarder),
        metrics.clone(),
        PumpSettings::from(config.as_ref()),
    );

    // Start health check server
    let health_state = HealthState {
        hub: hub_handle.clone(),
        metrics: metrics.clone(),
    };
    let health_addr = config.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server::start_health_server(&health_addr, health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    drop(hub_handle);

    tokio::select! {
        result = bridge.run() => {
            if let Err(e) = result {
                error!(error = %e, "Feed loop stopped");
            }
        }
        result = server::serve(listener, pump) => {
            if let Err(e) = result {
                error!(error = %e, "Listener stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    feed.disconnect();
    hub_task.abort();
    info!("Order Gateway stopped");

    Ok(())
}
