//! Exchange delivery dialects
//!
//! Exchanges deliver book data in one of three observed styles. The
//! dialect is carried on the subscription; all exchange-specific parsing
//! happens before messages reach the reconciler.

use std::collections::HashMap;

/// How an exchange delivers order book messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Partial deltas from the first message on; a REST snapshot seeds
    /// the full book.
    DeltaOnly,
    /// The first message is an authoritative full snapshot, everything
    /// after is a delta.
    SnapshotThenDelta,
    /// Every message is a full snapshot replacing the previous state.
    FullEachTime,
}

/// Per-exchange subscription hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeProfile {
    pub dialect: Dialect,
    /// Maximum book depth per side, propagated to parsing and snapshots
    pub max_count: usize,
}

/// Registry from stable exchange identifier to its delivery profile
#[derive(Debug, Clone, Default)]
pub struct ExchangeDirectory {
    profiles: HashMap<String, ExchangeProfile>,
}

impl ExchangeDirectory {
    /// Directory seeded with the known exchanges
    pub fn new() -> Self {
        let mut directory = Self::default();
        directory.insert("binance", Dialect::DeltaOnly, 1000);
        directory.insert("kucoin", Dialect::DeltaOnly, 100);
        directory.insert("bittrex", Dialect::SnapshotThenDelta, 500);
        directory.insert("poloniex", Dialect::SnapshotThenDelta, 100);
        directory.insert("huobi", Dialect::FullEachTime, 150);
        directory.insert("okx", Dialect::FullEachTime, 400);
        directory
    }

    pub fn insert(&mut self, exchange: &str, dialect: Dialect, max_count: usize) {
        self.profiles
            .insert(exchange.to_lowercase(), ExchangeProfile { dialect, max_count });
    }

    /// Look up a profile by exchange identifier, case-insensitive
    pub fn get(&self, exchange: &str) -> Option<ExchangeProfile> {
        self.profiles.get(&exchange.to_lowercase()).copied()
    }
}
