//! Binary message codec
//!
//! Fixed-layout big-endian encoding of `EnterOrder` requests and tag-based
//! classification of the event records the matching engine sends back.

mod event;
mod order;

pub use event::{classify_event, classify_fragment, event_body, frame_for_feed, EventKind};
pub use order::{EnterOrder, OrderBookId, OrderSide, OrderType};

/// Type tag of an `EnterOrder` message
pub const ENTER_ORDER_TAG: u8 = b'O';

/// Encoded size of an `EnterOrder` message in bytes
pub const ENTER_ORDER_LEN: usize = 43;

/// Price value reserved for market orders
pub const MARKET_PRICE: u32 = 0x7FFF_FFFF;

/// Length of the header preceding each feed record
pub const FEED_HEADER_LEN: usize = 2;
