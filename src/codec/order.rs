//! `EnterOrder` request encoding
//!
//! Layout (big-endian, 43 bytes):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0  | 1 | type tag `'O'` |
//! | 1  | 4 | order ID |
//! | 5  | 1 | account type `'C'` |
//! | 6  | 4 | account ID |
//! | 10 | 1 | side `'B'` / `'S'` |
//! | 11 | 8 | quantity |
//! | 19 | 4 | order book ID |
//! | 23 | 4 | price (fixed-point x1000) |
//! | 27 | 4 | time in force (zero) |
//! | 31 | 4 | client ID (zero) |
//! | 35 | 8 | minimum quantity (zero) |

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ENTER_ORDER_LEN, ENTER_ORDER_TAG, MARKET_PRICE};
use crate::error::{GatewayError, Result};

const ACCOUNT_TYPE_TAG: u8 = b'C';

/// Order book identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderBookId {
    ZilDai,
    EthDai,
    ZilEth,
    /// Identifier not known to this gateway, carried through unchanged
    Other(u32),
}

impl OrderBookId {
    pub fn as_u32(self) -> u32 {
        match self {
            OrderBookId::ZilDai => 777,
            OrderBookId::EthDai => 778,
            OrderBookId::ZilEth => 779,
            OrderBookId::Other(id) => id,
        }
    }
}

impl From<u32> for OrderBookId {
    fn from(id: u32) -> Self {
        match id {
            777 => OrderBookId::ZilDai,
            778 => OrderBookId::EthDai,
            779 => OrderBookId::ZilEth,
            other => OrderBookId::Other(other),
        }
    }
}

impl fmt::Display for OrderBookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookId::ZilDai => write!(f, "ZIL_DAI"),
            OrderBookId::EthDai => write!(f, "ETH_DAI"),
            OrderBookId::ZilEth => write!(f, "ZIL_ETH"),
            OrderBookId::Other(id) => write!(f, "BOOK_{}", id),
        }
    }
}

/// Side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_byte(self) -> u8 {
        match self {
            OrderSide::Buy => b'B',
            OrderSide::Sell => b'S',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'B' => Some(OrderSide::Buy),
            b'S' => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

/// Limit or market order, derived from the price on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    /// The wire format has no order type field: the sentinel price means market.
    ///
    /// A limit order priced exactly at the sentinel therefore decodes as a
    /// market order.
    pub fn from_price(price: u32) -> Self {
        if price == MARKET_PRICE {
            OrderType::Market
        } else {
            OrderType::Limit
        }
    }
}

/// Order entry request sent by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterOrder {
    pub account_id: u32,
    pub order_book_id: OrderBookId,
    pub order_id: u32,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: u64,
    /// Fixed-point price (x1000), `MARKET_PRICE` for market orders
    pub price: u32,
}

impl EnterOrder {
    /// Build a limit order
    pub fn limit(
        account_id: u32,
        order_book_id: OrderBookId,
        order_id: u32,
        side: OrderSide,
        quantity: u64,
        price: u32,
    ) -> Self {
        Self {
            account_id,
            order_book_id,
            order_id,
            order_type: OrderType::Limit,
            side,
            quantity,
            price,
        }
    }

    /// Build a market order
    pub fn market(
        account_id: u32,
        order_book_id: OrderBookId,
        order_id: u32,
        side: OrderSide,
        quantity: u64,
    ) -> Self {
        Self {
            account_id,
            order_book_id,
            order_id,
            order_type: OrderType::Market,
            side,
            quantity,
            price: MARKET_PRICE,
        }
    }

    /// Encode into a caller-provided buffer
    pub fn encode_into(&self, out: &mut [u8; ENTER_ORDER_LEN]) {
        let mut buf = &mut out[..];
        buf.put_u8(ENTER_ORDER_TAG);
        buf.put_u32(self.order_id);
        buf.put_u8(ACCOUNT_TYPE_TAG);
        buf.put_u32(self.account_id);
        buf.put_u8(self.side.as_byte());
        buf.put_u64(self.quantity);
        buf.put_u32(self.order_book_id.as_u32());
        buf.put_u32(self.price);
        // time in force, client ID
        buf.put_u32(0);
        buf.put_u32(0);
        // minimum quantity
        buf.put_u64(0);
    }

    /// Encode to the fixed 43-byte wire format
    pub fn serialize(&self) -> [u8; ENTER_ORDER_LEN] {
        let mut out = [0u8; ENTER_ORDER_LEN];
        self.encode_into(&mut out);
        out
    }

    /// Encode into a shareable buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.serialize())
    }

    /// Decode from the 43-byte wire format
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != ENTER_ORDER_LEN {
            return Err(GatewayError::MalformedMessage(format!(
                "EnterOrder must be {} bytes, got {}",
                ENTER_ORDER_LEN,
                data.len()
            )));
        }

        let mut buf = data;
        let tag = buf.get_u8();
        if tag != ENTER_ORDER_TAG {
            return Err(GatewayError::MalformedMessage(format!(
                "unexpected EnterOrder type tag {:#04x}",
                tag
            )));
        }

        let order_id = buf.get_u32();
        let _account_type = buf.get_u8();
        let account_id = buf.get_u32();
        let side_byte = buf.get_u8();
        let side = OrderSide::from_byte(side_byte).ok_or_else(|| {
            GatewayError::MalformedMessage(format!("unknown order side {:#04x}", side_byte))
        })?;
        let quantity = buf.get_u64();
        let order_book_id = OrderBookId::from(buf.get_u32());
        let price = buf.get_u32();

        Ok(Self {
            account_id,
            order_book_id,
            order_id,
            order_type: OrderType::from_price(price),
            side,
            quantity,
            price,
        })
    }
}
