//! In-process loopback feed
//!
//! Stands in for the matching engine in tests and benchmarks: fragments are
//! injected by hand and published buffers are collected for inspection.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transport::{FeedPublication, FeedSubscription, BACK_PRESSURED, NOT_CONNECTED};
use crate::codec::frame_for_feed;
use crate::error::Result;

#[derive(Debug)]
struct MemoryState {
    inbound: VecDeque<Bytes>,
    published: Vec<Bytes>,
    position: i64,
    connected: bool,
    back_pressured: bool,
    upstream_closed: bool,
    polls: usize,
}

/// Shared loopback feed; clones observe the same buffers
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                inbound: VecDeque::new(),
                published: Vec::new(),
                position: 0,
                connected: true,
                back_pressured: false,
                upstream_closed: false,
                polls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscription(&self) -> MemorySubscription {
        MemorySubscription { feed: self.clone() }
    }

    pub fn publication(&self) -> MemoryPublication {
        MemoryPublication { feed: self.clone() }
    }

    /// Queue a raw fragment (header included) for the subscription
    pub fn inject(&self, fragment: Bytes) {
        self.lock().inbound.push_back(fragment);
    }

    /// Queue an event record, adding the feed header
    pub fn inject_event(&self, body: &[u8]) -> Result<()> {
        let fragment = frame_for_feed(body)?;
        self.inject(fragment);
        Ok(())
    }

    /// Fragments not yet polled
    pub fn pending(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Drain every buffer offered to the publication so far
    pub fn take_published(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().published)
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn set_back_pressured(&self, back_pressured: bool) {
        self.lock().back_pressured = back_pressured;
    }

    /// Simulate losing the upstream; already injected fragments stay pollable
    pub fn close_upstream(&self) {
        self.lock().upstream_closed = true;
    }

    /// Number of `poll_fragment` calls made by subscriptions so far
    pub fn polls(&self) -> usize {
        self.lock().polls
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription half of a `MemoryFeed`
#[derive(Debug)]
pub struct MemorySubscription {
    feed: MemoryFeed,
}

impl FeedSubscription for MemorySubscription {
    fn poll_fragment(&mut self) -> Option<Bytes> {
        let mut state = self.feed.lock();
        state.polls += 1;
        state.inbound.pop_front()
    }

    fn is_closed(&self) -> bool {
        let state = self.feed.lock();
        state.upstream_closed && state.inbound.is_empty()
    }
}

/// Publication half of a `MemoryFeed`
#[derive(Debug)]
pub struct MemoryPublication {
    feed: MemoryFeed,
}

impl FeedPublication for MemoryPublication {
    fn offer(&mut self, buffer: &[u8]) -> i64 {
        let mut state = self.feed.lock();
        if !state.connected {
            return NOT_CONNECTED;
        }
        if state.back_pressured {
            return BACK_PRESSURED;
        }
        state.published.push(Bytes::copy_from_slice(buffer));
        state.position += buffer.len() as i64;
        state.position
    }

    fn is_connected(&self) -> bool {
        self.feed.lock().connected
    }
}
