//! Write side of a connection pump

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace};

use super::{ConnectionHandle, ConnectionState};
use crate::error::{GatewayError, Result};

pub(super) struct Writer {
    pub conn: Arc<ConnectionHandle>,
    pub queue: mpsc::Receiver<Bytes>,
    pub write_wait: Duration,
    pub ping_period: Duration,
}

impl Writer {
    /// Drain the outbound queue and keep the connection alive with pings
    pub async fn run<K>(mut self, mut sink: K)
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let conn = self.conn.clone();

        match self.write_frames(&mut sink).await {
            Ok(()) => debug!(conn_id = conn.id(), "Writer finished"),
            Err(e) if e.is_unexpected() => {
                error!(conn_id = conn.id(), error = %e, "Failed to write to connection")
            }
            Err(e) => debug!(conn_id = conn.id(), error = %e, "Writer stopped"),
        }

        conn.signal_writer_stopped();
    }

    async fn write_frames<K>(&mut self, sink: &mut K) -> Result<()>
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let mut ping = interval_at(Instant::now() + self.ping_period, self.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.conn.is_closing() {
                trace!(conn_id = self.conn.id(), "Discarding pending messages");
                return Ok(());
            }

            tokio::select! {
                item = self.queue.recv() => match item {
                    Some(payload) => {
                        if self.conn.is_closing() {
                            return Ok(());
                        }
                        self.send(sink, Message::Binary(payload.to_vec())).await?;
                        self.conn.touch_write();
                    }
                    None => {
                        if self.conn.state() == ConnectionState::Draining {
                            info!(conn_id = self.conn.id(), "Hub closed the queue, closing connection");
                        }
                        return self.send(sink, Message::Close(None)).await;
                    }
                },
                _ = ping.tick() => {
                    self.send(sink, Message::Ping(Vec::new())).await?;
                    trace!(conn_id = self.conn.id(), "Sent ping");
                }
                _ = self.conn.reader_closed() => {
                    return Ok(());
                }
            }
        }
    }

    async fn send<K>(&self, sink: &mut K, message: Message) -> Result<()>
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        timeout(self.write_wait, sink.send(message))
            .await
            .map_err(|_| GatewayError::Timeout("write"))?
            .map_err(GatewayError::from)
    }
}
