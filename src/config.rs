//! Configuration module for the order gateway

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where binary frames read from a client connection are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InboundRoute {
    /// `EnterOrder` frames are forwarded to the upstream feed
    OrderEntry,
    /// Every binary frame is re-broadcast to all registered connections
    Relay,
}

impl FromStr for InboundRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "order-entry" | "order_entry" | "orders" => Ok(InboundRoute::OrderEntry),
            "relay" | "broadcast" => Ok(InboundRoute::Relay),
            other => Err(format!("unknown inbound route: {}", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Downstream WebSocket listen address
    pub listen_addr: String,

    /// Health check and metrics HTTP address
    pub health_addr: String,

    /// Upstream feed endpoint
    pub feed_endpoint: String,

    /// Stream carrying orders towards the matching engine
    pub order_stream_id: u32,

    /// Stream carrying events from the matching engine
    pub event_stream_id: u32,

    /// Per-connection outbound queue capacity
    pub outbound_queue_capacity: usize,

    /// Time allowed to write a frame to the peer
    pub write_wait: Duration,

    /// Time allowed to read the next pong from the peer
    pub pong_wait: Duration,

    /// Keep-alive ping period, must be less than `pong_wait`
    pub ping_period: Duration,

    /// Sleep between feed polls that returned nothing
    pub idle_backoff: Duration,

    /// Maximum fragments handled per feed poll
    pub poll_batch_size: usize,

    /// Upstream connect timeout
    pub feed_connect_timeout: Duration,

    /// Routing of inbound client frames
    pub inbound_route: InboundRoute,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let inbound_route = match env::var("INBOUND_ROUTE") {
            Ok(raw) => raw.parse::<InboundRoute>().map_err(anyhow::Error::msg)?,
            Err(_) => defaults.inbound_route,
        };

        let config = Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            health_addr: env::var("HEALTH_ADDR").unwrap_or(defaults.health_addr),
            feed_endpoint: env::var("FEED_ENDPOINT").unwrap_or(defaults.feed_endpoint),
            order_stream_id: env_or("ORDER_STREAM_ID", defaults.order_stream_id),
            event_stream_id: env_or("EVENT_STREAM_ID", defaults.event_stream_id),
            outbound_queue_capacity: env_or(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            ),
            write_wait: env_millis("WRITE_WAIT_MS", defaults.write_wait),
            pong_wait: env_millis("PONG_WAIT_MS", defaults.pong_wait),
            ping_period: env_millis("PING_PERIOD_MS", defaults.ping_period),
            idle_backoff: env_millis("IDLE_BACKOFF_MS", defaults.idle_backoff),
            poll_batch_size: env_or("POLL_BATCH_SIZE", defaults.poll_batch_size),
            feed_connect_timeout: env_millis(
                "FEED_CONNECT_TIMEOUT_MS",
                defaults.feed_connect_timeout,
            ),
            inbound_route,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pumps and feed loop cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("OUTBOUND_QUEUE_CAPACITY must be greater than zero");
        }
        if self.poll_batch_size == 0 {
            anyhow::bail!("POLL_BATCH_SIZE must be greater than zero");
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            anyhow::bail!(
                "PING_PERIOD_MS ({}) must be non-zero and less than PONG_WAIT_MS ({})",
                self.ping_period.as_millis(),
                self.pong_wait.as_millis()
            );
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2054".to_string(),
            health_addr: "0.0.0.0:9090".to_string(),
            feed_endpoint: "127.0.0.1:40123".to_string(),
            order_stream_id: 1025,
            event_stream_id: 1024,
            outbound_queue_capacity: 128,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(10),
            idle_backoff: Duration::from_millis(1),
            poll_batch_size: 10,
            feed_connect_timeout: Duration::from_secs(5),
            inbound_route: InboundRoute::OrderEntry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_ping_period_must_be_shorter_than_pong_wait() {
        let config = Config {
            ping_period: Duration::from_secs(60),
            pong_wait: Duration::from_secs(60),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = Config {
            outbound_queue_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_inbound_route() {
        assert_eq!("relay".parse::<InboundRoute>(), Ok(InboundRoute::Relay));
        assert_eq!(
            "Order-Entry".parse::<InboundRoute>(),
            Ok(InboundRoute::OrderEntry)
        );
        assert!("fanout".parse::<InboundRoute>().is_err());
    }
}
