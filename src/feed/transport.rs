//! Feed transport contract

use bytes::Bytes;
use serde::Serialize;

/// Offer result: the publication has no connected subscriber
pub const NOT_CONNECTED: i64 = -1;
/// Offer result: the publication buffer is full
pub const BACK_PRESSURED: i64 = -2;

/// Receiving side of the feed. Polling never blocks.
pub trait FeedSubscription: Send {
    /// Take the next buffered fragment, if any
    fn poll_fragment(&mut self) -> Option<Bytes>;

    /// True once the upstream side is gone and nothing is left to poll
    fn is_closed(&self) -> bool {
        false
    }

    /// Iterate over at most `max` fragments currently available
    fn fragments(&mut self, max: usize) -> Fragments<'_, Self>
    where
        Self: Sized,
    {
        Fragments {
            subscription: self,
            remaining: max,
        }
    }
}

/// Bounded pull iterator over a subscription
pub struct Fragments<'a, S: FeedSubscription> {
    subscription: &'a mut S,
    remaining: usize,
}

impl<S: FeedSubscription> Iterator for Fragments<'_, S> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }
        let fragment = self.subscription.poll_fragment()?;
        self.remaining -= 1;
        Some(fragment)
    }
}

/// Sending side of the feed
pub trait FeedPublication: Send {
    /// Offer a buffer; returns the new stream position or a negative code
    fn offer(&mut self, buffer: &[u8]) -> i64;

    /// Whether anything is consuming this publication
    fn is_connected(&self) -> bool;
}

/// Classified result of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishOutcome {
    Accepted(i64),
    NotConnectedYet,
    BackPressured,
    UnrecognizedCode(i64),
}

impl PublishOutcome {
    pub fn from_code(code: i64) -> Self {
        match code {
            NOT_CONNECTED => PublishOutcome::NotConnectedYet,
            BACK_PRESSURED => PublishOutcome::BackPressured,
            c if c < 0 => PublishOutcome::UnrecognizedCode(c),
            position => PublishOutcome::Accepted(position),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, PublishOutcome::Accepted(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Accepted(_) => "accepted",
            PublishOutcome::NotConnectedYet => "not_connected",
            PublishOutcome::BackPressured => "back_pressured",
            PublishOutcome::UnrecognizedCode(_) => "unrecognized",
        }
    }
}
