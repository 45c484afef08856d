//! Core order book value
//!
//! Uses BTreeMap for sorted price level management. Both sides iterate
//! price-ascending: the best ask is the first ask entry and the best bid
//! is the last bid entry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Level, Side};

/// Order book snapshot or delta for a single symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    symbol: String,
    /// Exchange-assigned monotonic marker, comparable within one symbol
    sequence_id: i64,
    asks: BTreeMap<Decimal, Decimal>,
    bids: BTreeMap<Decimal, Decimal>,
    last_updated: DateTime<Utc>,
}

impl OrderBook {
    /// Create a new empty book
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            sequence_id: 0,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            last_updated: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn with_sequence(mut self, sequence_id: i64) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sequence_id(&self) -> i64 {
        self.sequence_id
    }

    pub fn set_sequence_id(&mut self, sequence_id: i64) {
        self.sequence_id = sequence_id;
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Stamp the book as updated now; called immediately before emission
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Insert a raw level on one side, keeping map semantics: a duplicate
    /// price collapses to the last occurrence. Non-positive amounts are
    /// preserved here because deltas carry them as deletion markers.
    pub fn insert(&mut self, side: Side, level: Level) {
        match side {
            Side::Ask => self.asks.insert(level.price, level.amount),
            Side::Bid => self.bids.insert(level.price, level.amount),
        };
    }

    /// Apply a delta in place.
    ///
    /// Returns false (leaving state untouched) when the delta is stale,
    /// i.e. its sequence is lower than the current one. Otherwise every
    /// delta level either overwrites its price or, when the amount or
    /// price is non-positive, removes it. Removing an absent price is a
    /// no-op: exchanges legitimately send deletes for levels trimmed off
    /// the client's top-N.
    pub fn apply(&mut self, delta: &OrderBook) -> bool {
        if delta.sequence_id < self.sequence_id {
            return false;
        }

        for (price, amount) in &delta.asks {
            if *amount <= Decimal::ZERO || *price <= Decimal::ZERO {
                self.asks.remove(price);
            } else {
                self.asks.insert(*price, *amount);
            }
        }

        for (price, amount) in &delta.bids {
            if *amount <= Decimal::ZERO || *price <= Decimal::ZERO {
                self.bids.remove(price);
            } else {
                self.bids.insert(*price, *amount);
            }
        }

        self.sequence_id = delta.sequence_id;
        true
    }

    /// Drop levels that must not appear in an emitted full book.
    ///
    /// Snapshots installed as the full book may carry non-positive
    /// entries; emitted books never do.
    pub fn prune(&mut self) {
        self.asks
            .retain(|price, amount| *amount > Decimal::ZERO && *price > Decimal::ZERO);
        self.bids
            .retain(|price, amount| *amount > Decimal::ZERO && *price > Decimal::ZERO);
    }

    /// Trim each side to at most `max_count` levels closest to the touch:
    /// lowest asks and highest bids survive.
    pub fn truncate_depth(&mut self, max_count: usize) {
        while self.asks.len() > max_count {
            self.asks.pop_last();
        }
        while self.bids.len() > max_count {
            self.bids.pop_first();
        }
    }

    /// Ascending (price, amount) iteration over asks
    pub fn asks(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks.iter().map(|(price, amount)| Level {
            price: *price,
            amount: *amount,
        })
    }

    /// Ascending (price, amount) iteration over bids
    pub fn bids(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids.iter().map(|(price, amount)| Level {
            price: *price,
            amount: *amount,
        })
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Best (lowest) ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(price, _)| *price)
    }

    /// Best (highest) bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.last_key_value().map(|(price, _)| *price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn book(symbol: &str, sequence: i64, asks: &[(Decimal, Decimal)], bids: &[(Decimal, Decimal)]) -> OrderBook {
        let mut book = OrderBook::new(symbol).with_sequence(sequence);
        for (price, amount) in asks {
            book.insert(Side::Ask, Level { price: *price, amount: *amount });
        }
        for (price, amount) in bids {
            book.insert(Side::Bid, Level { price: *price, amount: *amount });
        }
        book
    }

    #[test]
    fn test_best_prices() {
        let book = book(
            "BTC-USD",
            10,
            &[(dec!(101), dec!(1)), (dec!(102), dec!(2))],
            &[(dec!(99), dec!(1)), (dec!(100), dec!(2))],
        );
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
    }

    #[test]
    fn test_apply_overwrites_and_deletes() {
        let mut target = book(
            "BTC-USD",
            10,
            &[(dec!(5), dec!(5)), (dec!(6), dec!(6))],
            &[(dec!(4), dec!(4))],
        );
        let delta = book("BTC-USD", 11, &[(dec!(5), dec!(0))], &[(dec!(4), dec!(7))]);

        assert!(target.apply(&delta));
        assert_eq!(target.sequence_id(), 11);
        assert_eq!(target.asks().collect::<Vec<_>>(), vec![Level { price: dec!(6), amount: dec!(6) }]);
        assert_eq!(target.bids().collect::<Vec<_>>(), vec![Level { price: dec!(4), amount: dec!(7) }]);
    }

    #[test]
    fn test_apply_stale_is_dropped() {
        let mut target = book("BTC-USD", 50, &[(dec!(10), dec!(1))], &[]);
        let stale = book("BTC-USD", 49, &[(dec!(1), dec!(1))], &[]);

        assert!(!target.apply(&stale));
        assert_eq!(target.sequence_id(), 50);
        assert_eq!(target.ask_count(), 1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut once = book("BTC-USD", 10, &[(dec!(5), dec!(5))], &[(dec!(4), dec!(4))]);
        let delta = book("BTC-USD", 11, &[(dec!(5), dec!(2)), (dec!(7), dec!(1))], &[(dec!(4), dec!(0))]);

        let mut twice = once.clone();
        once.apply(&delta);
        twice.apply(&delta);
        twice.apply(&delta);

        assert_eq!(once.sequence_id(), twice.sequence_id());
        assert_eq!(once.asks().collect::<Vec<_>>(), twice.asks().collect::<Vec<_>>());
        assert_eq!(once.bids().collect::<Vec<_>>(), twice.bids().collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut target = book("BTC-USD", 10, &[(dec!(5), dec!(5))], &[]);
        let delta = book("BTC-USD", 11, &[(dec!(9), dec!(0))], &[]);

        assert!(target.apply(&delta));
        assert_eq!(target.sequence_id(), 11);
        assert_eq!(target.asks().collect::<Vec<_>>(), vec![Level { price: dec!(5), amount: dec!(5) }]);
    }

    #[test]
    fn test_prune_removes_nonpositive_levels() {
        let mut snapshot = book(
            "BTC-USD",
            10,
            &[(dec!(5), dec!(0)), (dec!(6), dec!(6)), (dec!(0), dec!(3))],
            &[(dec!(4), dec!(-1))],
        );
        snapshot.prune();
        assert_eq!(snapshot.asks().collect::<Vec<_>>(), vec![Level { price: dec!(6), amount: dec!(6) }]);
        assert_eq!(snapshot.bid_count(), 0);
    }

    #[test]
    fn test_truncate_depth_keeps_touch() {
        let mut book = book(
            "BTC-USD",
            10,
            &[(dec!(101), dec!(1)), (dec!(102), dec!(1)), (dec!(103), dec!(1))],
            &[(dec!(97), dec!(1)), (dec!(98), dec!(1)), (dec!(99), dec!(1))],
        );
        book.truncate_depth(2);
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.ask_count(), 2);
        assert_eq!(book.bid_count(), 2);
        assert_eq!(book.asks().last().map(|l| l.price), Some(dec!(102)));
        assert_eq!(book.bids().next().map(|l| l.price), Some(dec!(98)));
    }

    #[test]
    fn test_duplicate_price_collapses_to_last() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Ask, Level { price: dec!(5), amount: dec!(1) });
        book.insert(Side::Ask, Level { price: dec!(5), amount: dec!(2) });
        assert_eq!(book.asks().collect::<Vec<_>>(), vec![Level { price: dec!(5), amount: dec!(2) }]);
    }
}
