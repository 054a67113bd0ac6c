//! Prometheus metrics for the gateway

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::codec::EventKind;
use crate::error::{GatewayError, Result};

/// Gateway counters, registered in a registry owned by this value
pub struct GatewayMetrics {
    registry: Registry,
    pub active_connections: IntGauge,
    pub feed_connected: IntGauge,
    pub registrations: IntCounter,
    pub backpressure_disconnects: IntCounter,
    pub broadcasts: IntCounter,
    pub feed_fragments: IntCounterVec,
    pub publish_outcomes: IntCounterVec,
    pub malformed_messages: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let active_connections = IntGauge::new(
            "gateway_active_connections",
            "Connections currently registered with the hub",
        )
        .map_err(metric_error)?;
        let feed_connected = IntGauge::new(
            "gateway_feed_connected",
            "1 while the upstream feed subscription is live",
        )
        .map_err(metric_error)?;
        let registrations = IntCounter::new(
            "gateway_registrations_total",
            "Connections registered with the hub",
        )
        .map_err(metric_error)?;
        let backpressure_disconnects = IntCounter::new(
            "gateway_backpressure_disconnects_total",
            "Connections dropped because their outbound queue was full",
        )
        .map_err(metric_error)?;
        let broadcasts = IntCounter::new(
            "gateway_broadcasts_total",
            "Messages fanned out by the hub",
        )
        .map_err(metric_error)?;
        let feed_fragments = IntCounterVec::new(
            Opts::new("gateway_feed_fragments_total", "Feed fragments by event kind"),
            &["kind"],
        )
        .map_err(metric_error)?;
        let publish_outcomes = IntCounterVec::new(
            Opts::new("gateway_publish_outcomes_total", "Order publish results"),
            &["outcome"],
        )
        .map_err(metric_error)?;
        let malformed_messages = IntCounter::new(
            "gateway_malformed_messages_total",
            "Client frames dropped as malformed",
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(active_connections.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(feed_connected.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(registrations.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(backpressure_disconnects.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(broadcasts.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(feed_fragments.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(publish_outcomes.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(malformed_messages.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            active_connections,
            feed_connected,
            registrations,
            backpressure_disconnects,
            broadcasts,
            feed_fragments,
            publish_outcomes,
            malformed_messages,
        })
    }

    pub fn record_fragment(&self, kind: EventKind) {
        self.feed_fragments.with_label_values(&[kind.as_str()]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| GatewayError::ConfigError(e.to_string()))
    }
}

fn metric_error(err: prometheus::Error) -> GatewayError {
    GatewayError::ConfigError(format!("metrics: {}", err))
}
