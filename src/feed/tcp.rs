//! TCP feed transport
//!
//! Each direction uses its own socket. On connect a socket announces its
//! stream ID as a 4-byte big-endian hello; after that both directions carry
//! records prefixed with a 2-byte big-endian length.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::transport::{FeedPublication, FeedSubscription, BACK_PRESSURED, NOT_CONNECTED};
use crate::codec::FEED_HEADER_LEN;
use crate::config::Config;
use crate::error::{GatewayError, Result};

/// Fragments buffered between the socket reader and the poll loop
const SUBSCRIPTION_BUFFER: usize = 4096;
/// Buffers queued between `offer` and the socket writer
const PUBLICATION_BUFFER: usize = 1024;

/// Connected TCP feed; owns the background socket tasks
pub struct TcpFeed {
    endpoint: String,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl TcpFeed {
    /// Open the subscription and publication sockets.
    ///
    /// Any failure here is a startup failure.
    pub async fn connect(config: &Config) -> Result<(Self, TcpSubscription, TcpPublication)> {
        let endpoint = config.feed_endpoint.clone();

        let sub_stream = open_stream(config, config.event_stream_id).await?;
        let pub_stream = open_stream(config, config.order_stream_id).await?;

        let (fragment_tx, fragment_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (offer_tx, offer_rx) = mpsc::channel(PUBLICATION_BUFFER);

        let reader_task = tokio::spawn(read_fragments(sub_stream, fragment_tx));
        let writer_task = tokio::spawn(write_offers(pub_stream, offer_rx));

        info!(
            endpoint = %endpoint,
            event_stream = config.event_stream_id,
            order_stream = config.order_stream_id,
            "Connected to upstream feed"
        );

        let feed = Self {
            endpoint,
            reader_task,
            writer_task,
        };
        let subscription = TcpSubscription {
            fragments: fragment_rx,
            closed: false,
        };
        let publication = TcpPublication {
            offers: offer_tx,
            position: 0,
        };

        Ok((feed, subscription, publication))
    }

    /// Stop the socket tasks
    pub fn disconnect(self) {
        self.reader_task.abort();
        self.writer_task.abort();
        info!(endpoint = %self.endpoint, "Disconnected from upstream feed");
    }
}

async fn open_stream(config: &Config, stream_id: u32) -> Result<TcpStream> {
    let mut stream = timeout(
        config.feed_connect_timeout,
        TcpStream::connect(&config.feed_endpoint),
    )
    .await
    .map_err(|_| {
        GatewayError::StartupFailure(format!(
            "timed out connecting to feed at {}",
            config.feed_endpoint
        ))
    })?
    .map_err(|e| {
        GatewayError::StartupFailure(format!(
            "failed to connect to feed at {}: {}",
            config.feed_endpoint, e
        ))
    })?;

    stream.set_nodelay(true)?;
    stream.write_u32(stream_id).await.map_err(|e| {
        GatewayError::StartupFailure(format!("failed to announce stream {}: {}", stream_id, e))
    })?;

    Ok(stream)
}

async fn read_fragments(mut socket: TcpStream, fragments: mpsc::Sender<Bytes>) {
    loop {
        let len = match socket.read_u16().await {
            Ok(len) => len,
            Err(e) => {
                error!(error = %e, "Upstream feed subscription closed");
                return;
            }
        };

        let mut fragment = BytesMut::with_capacity(FEED_HEADER_LEN + len as usize);
        fragment.put_u16(len);
        fragment.resize(FEED_HEADER_LEN + len as usize, 0);
        if let Err(e) = socket.read_exact(&mut fragment[FEED_HEADER_LEN..]).await {
            error!(error = %e, "Upstream feed subscription closed mid-record");
            return;
        }

        if fragments.send(fragment.freeze()).await.is_err() {
            debug!("Subscription dropped, stopping feed reader");
            return;
        }
    }
}

async fn write_offers(mut socket: TcpStream, mut offers: mpsc::Receiver<Bytes>) {
    while let Some(buffer) = offers.recv().await {
        if let Err(e) = socket.write_all(&buffer).await {
            error!(error = %e, "Upstream feed publication closed");
            return;
        }
    }
}

/// Subscription half of a `TcpFeed`
pub struct TcpSubscription {
    fragments: mpsc::Receiver<Bytes>,
    closed: bool,
}

impl FeedSubscription for TcpSubscription {
    fn poll_fragment(&mut self) -> Option<Bytes> {
        match self.fragments.try_recv() {
            Ok(fragment) => Some(fragment),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // The socket reader exits only when the upstream is gone
                self.closed = true;
                None
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Publication half of a `TcpFeed`
pub struct TcpPublication {
    offers: mpsc::Sender<Bytes>,
    position: i64,
}

impl FeedPublication for TcpPublication {
    fn offer(&mut self, buffer: &[u8]) -> i64 {
        match self.offers.try_send(Bytes::copy_from_slice(buffer)) {
            Ok(()) => {
                self.position += buffer.len() as i64;
                self.position
            }
            Err(TrySendError::Full(_)) => BACK_PRESSURED,
            Err(TrySendError::Closed(_)) => NOT_CONNECTED,
        }
    }

    fn is_connected(&self) -> bool {
        !self.offers.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused_is_startup_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config {
            feed_endpoint: addr.to_string(),
            ..Config::default()
        };
        assert!(matches!(
            TcpFeed::connect(&config).await,
            Err(GatewayError::StartupFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_fragments_and_offers_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            feed_endpoint: listener.local_addr().unwrap().to_string(),
            ..Config::default()
        };

        let engine = tokio::spawn(async move {
            let (mut events, _) = listener.accept().await.unwrap();
            let (mut orders, _) = listener.accept().await.unwrap();
            assert_eq!(events.read_u32().await.unwrap(), 1024);
            assert_eq!(orders.read_u32().await.unwrap(), 1025);

            events.write_all(&[0, 3, b'A', 1, 2]).await.unwrap();

            let mut published = [0u8; 4];
            orders.read_exact(&mut published).await.unwrap();
            published
        });

        let (feed, mut subscription, mut publication) = TcpFeed::connect(&config).await.unwrap();
        assert!(publication.offer(&[0, 2, b'O', 9]) > 0);

        let fragment = loop {
            if let Some(fragment) = subscription.poll_fragment() {
                break fragment;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        };
        assert_eq!(fragment.as_ref(), &[0, 3, b'A', 1, 2]);
        assert_eq!(engine.await.unwrap(), [0, 2, b'O', 9]);
        assert!(!subscription.is_closed());

        feed.disconnect();
    }

    #[tokio::test]
    async fn test_subscription_reports_upstream_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            feed_endpoint: listener.local_addr().unwrap().to_string(),
            ..Config::default()
        };

        let engine = tokio::spawn(async move {
            let (mut events, _) = listener.accept().await.unwrap();
            let (orders, _) = listener.accept().await.unwrap();
            events.read_u32().await.unwrap();
            events.write_all(&[0, 1, b'E']).await.unwrap();
            drop(events);
            orders
        });

        let (feed, mut subscription, _publication) = TcpFeed::connect(&config).await.unwrap();
        let _orders = engine.await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !subscription.is_closed() {
                if let Some(fragment) = subscription.poll_fragment() {
                    received.push(fragment);
                } else {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
            }
        })
        .await
        .unwrap();

        // Fragments read before the loss are still delivered
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_ref(), &[0, 1, b'E']);
        assert!(subscription.poll_fragment().is_none());

        feed.disconnect();
    }
}
