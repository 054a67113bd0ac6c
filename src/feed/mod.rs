//! Upstream feed bridge
//!
//! Drives the poll loop against the matching engine feed, forwards
//! qualifying event records into the hub and publishes client orders.

mod bridge;
mod memory;
mod tcp;
mod transport;

pub use bridge::{FeedBridge, OrderForwarder, PollSummary};
pub use memory::{MemoryFeed, MemoryPublication, MemorySubscription};
pub use tcp::{TcpFeed, TcpPublication, TcpSubscription};
pub use transport::{
    FeedPublication, FeedSubscription, Fragments, PublishOutcome, BACK_PRESSURED, NOT_CONNECTED,
};
