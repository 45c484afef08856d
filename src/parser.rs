//! Book payload parsing
//!
//! Converts a parsed JSON token tree into an [`OrderBook`]. Two layouts
//! are recognized across exchanges: positional arrays (`[price, amount]`)
//! and keyed objects (`{price, amount}`), each with a named top-level
//! sequence field. Field names vary per exchange and are supplied as
//! overrides.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{FeedError, Result};
use crate::orderbook::{Level, OrderBook, Side};

/// Field-name overrides for a book payload
#[derive(Debug, Clone, Copy)]
pub struct BookFields<'a> {
    pub sequence: &'a str,
    pub asks: &'a str,
    pub bids: &'a str,
    /// Price field within a keyed entry; ignored for positional layouts
    pub price: &'a str,
    /// Amount field within a keyed entry; ignored for positional layouts
    pub amount: &'a str,
}

impl Default for BookFields<'_> {
    fn default() -> Self {
        Self {
            sequence: "sequence",
            asks: "asks",
            bids: "bids",
            price: "price",
            amount: "amount",
        }
    }
}

/// Parse a positional-layout payload: each side entry is `[price, amount]`.
pub fn parse_positional_book(
    symbol: &str,
    payload: &Value,
    fields: &BookFields<'_>,
    max_count: usize,
) -> Result<OrderBook> {
    let mut book = OrderBook::new(symbol).with_sequence(sequence_field(payload, fields.sequence)?);
    for (side, name) in [(Side::Ask, fields.asks), (Side::Bid, fields.bids)] {
        for entry in side_entries(payload, name)?.iter().take(max_count) {
            let pair = entry
                .as_array()
                .filter(|pair| pair.len() >= 2)
                .ok_or_else(|| {
                    FeedError::Parse(format!("expected [price, amount] entry in '{}'", name))
                })?;
            book.insert(
                side,
                Level {
                    price: decimal_value(&pair[0])?,
                    amount: decimal_value(&pair[1])?,
                },
            );
        }
    }
    Ok(book)
}

/// Parse a keyed-layout payload: each side entry is an object carrying
/// named price and amount fields.
pub fn parse_keyed_book(
    symbol: &str,
    payload: &Value,
    fields: &BookFields<'_>,
    max_count: usize,
) -> Result<OrderBook> {
    let mut book = OrderBook::new(symbol).with_sequence(sequence_field(payload, fields.sequence)?);
    for (side, name) in [(Side::Ask, fields.asks), (Side::Bid, fields.bids)] {
        for entry in side_entries(payload, name)?.iter().take(max_count) {
            let price = entry.get(fields.price).ok_or_else(|| {
                FeedError::Parse(format!("missing '{}' in '{}' entry", fields.price, name))
            })?;
            let amount = entry.get(fields.amount).ok_or_else(|| {
                FeedError::Parse(format!("missing '{}' in '{}' entry", fields.amount, name))
            })?;
            book.insert(
                side,
                Level {
                    price: decimal_value(price)?,
                    amount: decimal_value(amount)?,
                },
            );
        }
    }
    Ok(book)
}

fn side_entries<'v>(payload: &'v Value, name: &str) -> Result<&'v Vec<Value>> {
    match payload.get(name) {
        Some(Value::Array(entries)) => Ok(entries),
        Some(_) => Err(FeedError::Parse(format!("'{}' is not an array", name))),
        // An absent side is an empty side; deltas often carry only one.
        None => {
            static EMPTY: Vec<Value> = Vec::new();
            Ok(&EMPTY)
        }
    }
}

fn sequence_field(payload: &Value, name: &str) -> Result<i64> {
    let value = payload
        .get(name)
        .ok_or_else(|| FeedError::Parse(format!("missing sequence field '{}'", name)))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FeedError::Parse(format!("sequence field '{}' out of range", name))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| FeedError::Parse(format!("sequence field '{}': {}", name, e))),
        _ => Err(FeedError::Parse(format!(
            "sequence field '{}' is not numeric",
            name
        ))),
    }
}

/// Numbers arrive as JSON strings on most feeds and as raw numbers on a
/// few; both go through `Decimal` with invariant (locale-independent)
/// parsing.
fn decimal_value(value: &Value) -> Result<Decimal> {
    match value {
        Value::String(s) => {
            Decimal::from_str(s).map_err(|e| FeedError::Parse(format!("bad decimal '{}': {}", s, e)))
        }
        Value::Number(n) => {
            let repr = n.to_string();
            Decimal::from_str(&repr)
                .or_else(|_| Decimal::from_scientific(&repr))
                .map_err(|e| FeedError::Parse(format!("bad decimal '{}': {}", n, e)))
        }
        _ => Err(FeedError::Parse("expected a numeric value".into())),
    }
}
