//! Connection pump
//!
//! Each accepted client gets exactly two tasks: a reader that owns the
//! receiving half of the socket and a writer that owns the sending half and
//! drains the connection's outbound queue.

mod connection;
mod reader;
mod writer;

pub use connection::{ConnectionHandle, ConnectionState};

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::config::{Config, InboundRoute};
use crate::feed::OrderForwarder;
use crate::hub::{HubHandle, Registration};
use crate::metrics::GatewayMetrics;
use reader::Reader;
use writer::Writer;

/// Destination of binary frames read from a client
#[derive(Clone)]
pub enum Inbound {
    /// Forward `EnterOrder` frames to the upstream feed
    OrderEntry(OrderForwarder),
    /// Re-broadcast every binary frame through the hub
    Relay,
}

impl Inbound {
    pub fn from_route(route: InboundRoute, forwarder: OrderForwarder) -> Self {
        match route {
            InboundRoute::OrderEntry => Inbound::OrderEntry(forwarder),
            InboundRoute::Relay => Inbound::Relay,
        }
    }
}

/// Timing and sizing shared by every pump
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub queue_capacity: usize,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
}

impl From<&Config> for PumpSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.outbound_queue_capacity,
            write_wait: config.write_wait,
            pong_wait: config.pong_wait,
            ping_period: config.ping_period,
        }
    }
}

/// Everything a pump needs besides its socket
#[derive(Clone)]
pub struct Pump {
    hub: HubHandle,
    inbound: Inbound,
    metrics: Arc<GatewayMetrics>,
    settings: PumpSettings,
}

impl Pump {
    pub fn new(
        hub: HubHandle,
        inbound: Inbound,
        metrics: Arc<GatewayMetrics>,
        settings: PumpSettings,
    ) -> Self {
        Self {
            hub,
            inbound,
            metrics,
            settings,
        }
    }

    /// Register the connection and run its reader and writer until both exit
    pub async fn run<S>(
        &self,
        ws: WebSocketStream<S>,
        peer: Option<SocketAddr>,
    ) -> Arc<ConnectionHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Arc::new(ConnectionHandle::new(self.hub.next_connection_id(), peer));
        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_capacity);

        if let Err(e) = self
            .hub
            .register(Registration::new(conn.clone(), queue_tx))
            .await
        {
            warn!(conn_id = conn.id(), error = %e, "Could not register connection");
            conn.mark_closed();
            return conn;
        }
        info!(conn_id = conn.id(), peer = ?peer, "Connection accepted");

        let (sink, stream) = ws.split();

        let reader = Reader {
            conn: conn.clone(),
            hub: self.hub.clone(),
            inbound: self.inbound.clone(),
            metrics: self.metrics.clone(),
            pong_wait: self.settings.pong_wait,
        };
        let writer = Writer {
            conn: conn.clone(),
            queue: queue_rx,
            write_wait: self.settings.write_wait,
            ping_period: self.settings.ping_period,
        };

        let read_task = tokio::spawn(reader.run(stream));
        let write_task = tokio::spawn(writer.run(sink));
        let (read_result, write_result) = tokio::join!(read_task, write_task);
        if let Err(e) = read_result.and(write_result) {
            warn!(conn_id = conn.id(), error = %e, "Pump task failed");
        }

        conn.mark_closed();
        debug!(conn_id = conn.id(), "Pump finished");
        conn
    }
}
