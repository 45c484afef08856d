//! Order book module
//!
//! Book values, delta application, and the per-symbol reconciler.

mod book;
mod reconciler;

pub use book::OrderBook;
pub use reconciler::{BookCallback, BookReconciler, SnapshotSource};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single price level
///
/// A level with `amount <= 0` or `price <= 0` marks a deletion of that
/// price when applied as part of a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}
