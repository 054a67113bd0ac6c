//! Read side of a connection pump

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionHandle, Inbound};
use crate::codec::EnterOrder;
use crate::error::{GatewayError, Result};
use crate::hub::HubHandle;
use crate::metrics::GatewayMetrics;

pub(super) struct Reader {
    pub conn: Arc<ConnectionHandle>,
    pub hub: HubHandle,
    pub inbound: Inbound,
    pub metrics: Arc<GatewayMetrics>,
    pub pong_wait: Duration,
}

impl Reader {
    /// Read frames until the peer goes away, then unregister from the hub
    pub async fn run<S>(self, stream: S)
    where
        S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
    {
        let reason = self.read_frames(stream).await;

        if self.conn.begin_closing() {
            debug!(conn_id = self.conn.id(), "Reader closing connection");
        }

        if reason.is_unexpected() {
            error!(conn_id = self.conn.id(), error = %reason, "Connection closed unexpectedly");
        } else {
            info!(conn_id = self.conn.id(), "Connection closed");
        }

        if let Err(e) = self.hub.unregister(self.conn.id()).await {
            warn!(conn_id = self.conn.id(), error = %e, "Failed to unregister connection");
        }
    }

    async fn read_frames<S>(&self, mut stream: S) -> GatewayError
    where
        S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
    {
        let mut deadline = Instant::now() + self.pong_wait;

        loop {
            let next = tokio::select! {
                next = timeout_at(deadline, stream.next()) => next,
                _ = self.conn.writer_stopped() => {
                    return GatewayError::ConnectionClosedExpectedly;
                }
            };

            let frame = match next {
                Ok(frame) => frame,
                Err(_) => return GatewayError::Timeout("pong"),
            };

            match frame {
                Some(Ok(Message::Binary(data))) => {
                    match self.handle_binary(Bytes::from(data)).await {
                        Ok(()) => {}
                        Err(GatewayError::MalformedMessage(reason)) => {
                            self.metrics.malformed_messages.inc();
                            warn!(conn_id = self.conn.id(), reason = %reason, "Dropping malformed message");
                        }
                        Err(other) => return other,
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    self.conn.touch_pong();
                    deadline = Instant::now() + self.pong_wait;
                    trace!(conn_id = self.conn.id(), "Received pong");
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong reply itself
                    trace!(conn_id = self.conn.id(), "Received ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn_id = self.conn.id(), frame = ?frame, "Received close frame");
                    return GatewayError::from_close_code(frame.map(|f| f.code));
                }
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Frame(_))) => {
                    trace!(conn_id = self.conn.id(), "Ignoring non-binary frame");
                }
                Some(Err(e)) => return e.into(),
                None => return GatewayError::ConnectionClosedExpectedly,
            }
        }
    }

    async fn handle_binary(&self, data: Bytes) -> Result<()> {
        match &self.inbound {
            Inbound::Relay => self.hub.broadcast(data).await,
            Inbound::OrderEntry(forwarder) => {
                // Wrong length or tag surfaces as MalformedMessage
                let order = EnterOrder::deserialize(&data)?;
                info!(
                    conn_id = self.conn.id(),
                    account_id = order.account_id,
                    order_id = order.order_id,
                    book = %order.order_book_id,
                    side = ?order.side,
                    order_type = ?order.order_type,
                    quantity = order.quantity,
                    price = order.price,
                    "EnterOrder received"
                );

                // Publish failures are diagnostics only; the connection stays up.
                if let Err(e) = forwarder.forward_order(&data).await {
                    warn!(conn_id = self.conn.id(), error = %e, "Order not forwarded");
                }
                Ok(())
            }
        }
    }
}
