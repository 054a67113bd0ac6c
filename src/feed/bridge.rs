//! Feed bridge
//!
//! Moves event records from the feed into the hub and client orders from the
//! pumps onto the feed.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use super::transport::{FeedPublication, FeedSubscription, PublishOutcome};
use crate::codec::{classify_fragment, event_body, frame_for_feed, EventKind};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::hub::HubHandle;
use crate::metrics::GatewayMetrics;

/// What one poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Fragments taken from the subscription
    pub fragments: usize,
    /// Fragments forwarded to the hub
    pub broadcast: usize,
    /// Fragments dropped as unknown
    pub dropped: usize,
}

/// Owns the feed poll loop
pub struct FeedBridge<S: FeedSubscription> {
    subscription: S,
    hub: HubHandle,
    metrics: Arc<GatewayMetrics>,
    batch_size: usize,
    idle_backoff: std::time::Duration,
}

impl<S: FeedSubscription> FeedBridge<S> {
    pub fn new(
        subscription: S,
        hub: HubHandle,
        metrics: Arc<GatewayMetrics>,
        config: &Config,
    ) -> Self {
        metrics.feed_connected.set(1);
        Self {
            subscription,
            hub,
            metrics,
            batch_size: config.poll_batch_size,
            idle_backoff: config.idle_backoff,
        }
    }

    /// Poll until the hub or the upstream goes away
    pub async fn run(mut self) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            idle_backoff_us = self.idle_backoff.as_micros() as u64,
            "Starting feed poll loop"
        );

        loop {
            let summary = self.poll_once().await?;
            if summary.fragments == 0 {
                if self.subscription.is_closed() {
                    self.metrics.feed_connected.set(0);
                    error!("Upstream feed subscription closed");
                    return Err(GatewayError::UpstreamUnavailable(
                        "feed subscription closed".to_string(),
                    ));
                }
                sleep(self.idle_backoff).await;
            }
        }
    }

    /// Handle at most one batch of fragments
    pub async fn poll_once(&mut self) -> Result<PollSummary> {
        let batch: Vec<Bytes> = self.subscription.fragments(self.batch_size).collect();

        let mut summary = PollSummary {
            fragments: batch.len(),
            ..PollSummary::default()
        };

        for fragment in batch {
            if self.classify_and_forward(fragment).await? {
                summary.broadcast += 1;
            } else {
                summary.dropped += 1;
            }
        }

        Ok(summary)
    }

    /// Forward accepted/rejected/executed records; returns whether it was broadcast
    async fn classify_and_forward(&self, fragment: Bytes) -> Result<bool> {
        let kind = classify_fragment(&fragment);
        self.metrics.record_fragment(kind);

        let body = match (kind, event_body(&fragment)) {
            (EventKind::Unknown, _) | (_, None) => {
                debug!(len = fragment.len(), fragment = ?fragment, "Dropping unknown feed fragment");
                return Ok(false);
            }
            (_, Some(body)) => body,
        };

        trace!(kind = ?kind, len = body.len(), "Forwarding feed event");
        self.hub.broadcast(body).await?;
        Ok(true)
    }
}

/// Publishes client orders to the feed.
///
/// Publishes are serialized through a mutex; the transport handle is not
/// shared between concurrent writers.
#[derive(Clone)]
pub struct OrderForwarder {
    publication: Arc<Mutex<Box<dyn FeedPublication>>>,
    metrics: Arc<GatewayMetrics>,
}

impl OrderForwarder {
    pub fn new(publication: Box<dyn FeedPublication>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            publication: Arc::new(Mutex::new(publication)),
            metrics,
        }
    }

    /// Write a raw `EnterOrder` to the feed. Fire-and-forget: the outcome is
    /// logged and returned, never retried.
    pub async fn forward_order(&self, payload: &[u8]) -> Result<PublishOutcome> {
        let framed = frame_for_feed(payload)?;

        let (outcome, connected) = {
            let mut publication = self.publication.lock().await;
            let code = publication.offer(&framed);
            (PublishOutcome::from_code(code), publication.is_connected())
        };

        self.metrics
            .publish_outcomes
            .with_label_values(&[outcome.as_str()])
            .inc();

        match outcome {
            PublishOutcome::Accepted(position) => {
                debug!(position, len = payload.len(), "Order published to feed");
            }
            PublishOutcome::NotConnectedYet => {
                warn!("Order publish failed: feed not connected yet");
            }
            PublishOutcome::BackPressured => {
                warn!("Order publish failed: feed back pressured");
            }
            PublishOutcome::UnrecognizedCode(code) => {
                warn!(code, "Order publish failed: unrecognized result code");
            }
        }
        if !connected {
            warn!("No feed subscribers detected");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EnterOrder, OrderBookId, OrderSide};
    use crate::feed::MemoryFeed;
    use crate::hub::{Hub, Registration};
    use crate::pump::ConnectionHandle;
    use tokio::sync::mpsc;

    async fn bridge_with_listener(
        feed: &MemoryFeed,
    ) -> (FeedBridge<crate::feed::MemorySubscription>, HubHandle, mpsc::Receiver<Bytes>) {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let (hub, handle) = Hub::new(metrics.clone());
        tokio::spawn(hub.run());

        let conn = Arc::new(ConnectionHandle::new(handle.next_connection_id(), None));
        let (tx, rx) = mpsc::channel(16);
        handle.register(Registration::new(conn, tx)).await.unwrap();

        let bridge = FeedBridge::new(
            feed.subscription(),
            handle.clone(),
            metrics,
            &Config::default(),
        );
        (bridge, handle, rx)
    }

    #[tokio::test]
    async fn test_known_events_broadcast_without_header() {
        let feed = MemoryFeed::new();
        let (mut bridge, handle, mut rx) = bridge_with_listener(&feed).await;

        feed.inject_event(b"Aaccepted").unwrap();
        feed.inject_event(b"Jrejected").unwrap();
        feed.inject_event(b"Eexecuted").unwrap();

        let summary = bridge.poll_once().await.unwrap();
        assert_eq!(summary, PollSummary { fragments: 3, broadcast: 3, dropped: 0 });

        handle.connection_count().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Aaccepted");
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Jrejected");
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Eexecuted");
    }

    #[tokio::test]
    async fn test_unknown_fragments_never_broadcast() {
        let feed = MemoryFeed::new();
        let (mut bridge, handle, mut rx) = bridge_with_listener(&feed).await;

        feed.inject_event(b"Zmystery").unwrap();
        feed.inject(Bytes::from_static(&[0, 0]));
        feed.inject_event(b"Jrejected").unwrap();

        let summary = bridge.poll_once().await.unwrap();
        assert_eq!(summary.fragments, 3);
        assert_eq!(summary.broadcast, 1);
        assert_eq!(summary.dropped, 2);

        handle.connection_count().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Jrejected");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_respects_batch_size() {
        let feed = MemoryFeed::new();
        let (mut bridge, _handle, _rx) = bridge_with_listener(&feed).await;

        for _ in 0..15 {
            feed.inject_event(b"E").unwrap();
        }

        assert_eq!(bridge.poll_once().await.unwrap().fragments, 10);
        assert_eq!(bridge.poll_once().await.unwrap().fragments, 5);
        assert_eq!(bridge.poll_once().await.unwrap().fragments, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_backs_off_before_polling_again() {
        let feed = MemoryFeed::new();
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let (hub, handle) = Hub::new(metrics.clone());
        tokio::spawn(hub.run());

        let config = Config {
            idle_backoff: std::time::Duration::from_millis(100),
            ..Config::default()
        };
        let bridge = FeedBridge::new(feed.subscription(), handle, metrics, &config);
        let task = tokio::spawn(bridge.run());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.polls(), 1);

        tokio::time::advance(std::time::Duration::from_millis(50)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.polls(), 1);

        tokio::time::advance(std::time::Duration::from_millis(60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.polls(), 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_run_stops_when_upstream_closes() {
        let feed = MemoryFeed::new();
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let (hub, handle) = Hub::new(metrics.clone());
        tokio::spawn(hub.run());

        let conn = Arc::new(ConnectionHandle::new(handle.next_connection_id(), None));
        let (tx, mut rx) = mpsc::channel(16);
        handle.register(Registration::new(conn, tx)).await.unwrap();

        let bridge = FeedBridge::new(
            feed.subscription(),
            handle.clone(),
            metrics.clone(),
            &Config::default(),
        );
        assert_eq!(metrics.feed_connected.get(), 1);

        feed.inject_event(b"Elast").unwrap();
        feed.close_upstream();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), bridge.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable(_))));
        assert_eq!(metrics.feed_connected.get(), 0);

        // The fragment buffered before the loss is still delivered
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"Elast");
    }

    #[tokio::test]
    async fn test_forward_order_frames_and_classifies() {
        let feed = MemoryFeed::new();
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let forwarder = OrderForwarder::new(Box::new(feed.publication()), metrics);

        let order = EnterOrder::market(2, OrderBookId::EthDai, 1, OrderSide::Buy, 100).serialize();
        let outcome = forwarder.forward_order(&order).await.unwrap();
        assert!(outcome.is_accepted());

        let published = feed.take_published();
        assert_eq!(published.len(), 1);
        assert_eq!(&published[0][..2], &43u16.to_be_bytes());
        assert_eq!(&published[0][2..], &order[..]);

        feed.set_back_pressured(true);
        assert_eq!(
            forwarder.forward_order(&order).await.unwrap(),
            PublishOutcome::BackPressured
        );
        feed.set_connected(false);
        assert_eq!(
            forwarder.forward_order(&order).await.unwrap(),
            PublishOutcome::NotConnectedYet
        );
        assert!(feed.take_published().is_empty());
    }
}
