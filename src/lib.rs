//! Order Gateway Library
//!
//! Bridges the matching engine feed to any number of WebSocket clients.
//! Client `EnterOrder` frames are published to the feed; accepted, rejected
//! and executed events coming back from the feed are fanned out to every
//! registered connection through a single hub control loop.

pub mod codec;
pub mod config;
pub mod error;
pub mod feed;
pub mod hub;
pub mod metrics;
pub mod pump;
pub mod server;

pub use codec::{classify_event, EnterOrder, EventKind, OrderBookId, OrderSide, OrderType};
pub use config::{Config, InboundRoute};
pub use error::{GatewayError, Result};
pub use feed::{FeedBridge, MemoryFeed, OrderForwarder, PublishOutcome, TcpFeed};
pub use hub::{Hub, HubHandle};
pub use metrics::GatewayMetrics;
pub use pump::{ConnectionHandle, ConnectionState, Inbound, Pump, PumpSettings};
