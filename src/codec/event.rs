//! Event record classification and feed framing

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::FEED_HEADER_LEN;
use crate::error::{GatewayError, Result};

/// Kind of event record received from the matching engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Accepted,
    Rejected,
    Executed,
    Unknown,
}

impl EventKind {
    /// Whether records of this kind are forwarded to clients
    pub fn is_broadcast(self) -> bool {
        !matches!(self, EventKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Accepted => "accepted",
            EventKind::Rejected => "rejected",
            EventKind::Executed => "executed",
            EventKind::Unknown => "unknown",
        }
    }
}

/// Classify an event record by its type tag
pub fn classify_event(tag: u8) -> EventKind {
    match tag {
        b'A' => EventKind::Accepted,
        b'J' => EventKind::Rejected,
        b'E' => EventKind::Executed,
        _ => EventKind::Unknown,
    }
}

/// Classify a raw feed fragment (header included)
pub fn classify_fragment(fragment: &[u8]) -> EventKind {
    match fragment.get(FEED_HEADER_LEN) {
        Some(tag) => classify_event(*tag),
        None => EventKind::Unknown,
    }
}

/// Strip the feed header, leaving the event record forwarded to clients
pub fn event_body(fragment: &Bytes) -> Option<Bytes> {
    if fragment.len() > FEED_HEADER_LEN {
        Some(fragment.slice(FEED_HEADER_LEN..))
    } else {
        None
    }
}

/// Prefix a payload with the 2-byte big-endian length header used on the feed
pub fn frame_for_feed(payload: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        GatewayError::MalformedMessage(format!(
            "payload of {} bytes does not fit a feed frame",
            payload.len()
        ))
    })?;

    let mut buf = BytesMut::with_capacity(FEED_HEADER_LEN + payload.len());
    buf.put_u16(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_event() {
        assert_eq!(classify_event(b'A'), EventKind::Accepted);
        assert_eq!(classify_event(b'J'), EventKind::Rejected);
        assert_eq!(classify_event(b'E'), EventKind::Executed);
        assert_eq!(classify_event(b'Z'), EventKind::Unknown);
        assert_eq!(classify_event(b'O'), EventKind::Unknown);
    }

    #[test]
    fn test_classify_fragment_skips_header() {
        assert_eq!(classify_fragment(&[0, 3, b'A', 1, 2]), EventKind::Accepted);
        assert_eq!(classify_fragment(&[b'A', b'A']), EventKind::Unknown);
        assert_eq!(classify_fragment(&[]), EventKind::Unknown);
    }

    #[test]
    fn test_event_body() {
        let fragment = Bytes::from_static(&[0, 3, b'E', 7, 8]);
        assert_eq!(event_body(&fragment).unwrap().as_ref(), &[b'E', 7, 8]);
        assert!(event_body(&Bytes::from_static(&[0, 0])).is_none());
    }

    #[test]
    fn test_frame_for_feed() {
        let framed = frame_for_feed(b"Oabc").unwrap();
        assert_eq!(framed.as_ref(), &[0, 4, b'O', b'a', b'b', b'c']);
        assert!(frame_for_feed(&vec![0u8; 70_000]).is_err());
    }
}
