//! Per-symbol book reconciliation
//!
//! Turns the per-dialect message stream into a monotonic full-book
//! stream. The DeltaOnly path relies on a queue-before-snapshot
//! discipline: every delta is enqueued BEFORE the snapshot is consulted,
//! and the queue is drained FIFO only once a snapshot is installed. Do
//! not bypass the queue even when the snapshot appears to have arrived
//! first; that reordering is exactly what loses deltas.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::OrderBook;
use crate::dialect::Dialect;
use crate::error::{FeedError, Result};

/// REST snapshot collaborator for the DeltaOnly dialect.
///
/// The returned book must carry a sequence id comparable to the delta
/// sequence ids of the same exchange.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn get_order_book(&self, symbol: &str, max_count: usize) -> Result<OrderBook>;
}

/// Invoked with each reconciled full book, after the per-symbol lock is
/// released.
pub type BookCallback = Arc<dyn Fn(&OrderBook) + Send + Sync>;

struct SymbolState {
    full_book: Option<OrderBook>,
    pending: VecDeque<OrderBook>,
    should_fetch: bool,
    snapshot_in_flight: bool,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            full_book: None,
            pending: VecDeque::new(),
            should_fetch: true,
            snapshot_in_flight: false,
        }
    }
}

/// Per-symbol state machine consuming book increments and emitting
/// reconciled full books
pub struct BookReconciler {
    dialect: Dialect,
    max_count: usize,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    on_book: BookCallback,
    states: Mutex<HashMap<String, Arc<Mutex<SymbolState>>>>,
}

impl BookReconciler {
    pub fn new(
        dialect: Dialect,
        max_count: usize,
        snapshots: Option<Arc<dyn SnapshotSource>>,
        on_book: BookCallback,
    ) -> Self {
        Self {
            dialect,
            max_count,
            snapshots,
            on_book,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Consume one message from the feed.
    ///
    /// Messages for different symbols may arrive concurrently; per-symbol
    /// work is serialized by the symbol's own lock, held only over apply.
    pub async fn on_increment(&self, incoming: OrderBook) -> Result<()> {
        match self.dialect {
            Dialect::FullEachTime => self.replace_and_emit(incoming),
            Dialect::SnapshotThenDelta => self.seed_or_apply(incoming),
            Dialect::DeltaOnly => self.enqueue_and_drain(incoming).await,
        }
    }

    /// Drop all per-symbol state.
    ///
    /// Called on transport reconnect: sequence continuity cannot be
    /// verified across a gap, so books are rebuilt from scratch.
    pub fn clear(&self) {
        self.states.lock().expect("reconciler state lock").clear();
    }

    fn state_for(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        let mut states = self.states.lock().expect("reconciler state lock");
        states
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolState::new())))
            .clone()
    }

    fn emit(&self, book: &OrderBook) {
        (self.on_book)(book);
    }

    fn replace_and_emit(&self, mut incoming: OrderBook) -> Result<()> {
        let state = self.state_for(incoming.symbol());
        let emitted = {
            let mut state = state.lock().expect("symbol state lock");
            if let Some(current) = &state.full_book {
                if incoming.sequence_id() < current.sequence_id() {
                    debug!(
                        symbol = incoming.symbol(),
                        sequence = incoming.sequence_id(),
                        "dropping stale snapshot"
                    );
                    return Ok(());
                }
            }
            incoming.prune();
            incoming.truncate_depth(self.max_count);
            incoming.touch();
            let emitted = incoming.clone();
            state.full_book = Some(incoming);
            emitted
        };
        self.emit(&emitted);
        Ok(())
    }

    fn seed_or_apply(&self, mut incoming: OrderBook) -> Result<()> {
        let state = self.state_for(incoming.symbol());
        let emitted = {
            let mut state = state.lock().expect("symbol state lock");
            match state.full_book.as_mut() {
                None => {
                    incoming.prune();
                    incoming.truncate_depth(self.max_count);
                    incoming.touch();
                    let emitted = incoming.clone();
                    state.full_book = Some(incoming);
                    emitted
                }
                Some(book) => {
                    if !book.apply(&incoming) {
                        return Ok(());
                    }
                    book.touch();
                    book.clone()
                }
            }
        };
        self.emit(&emitted);
        Ok(())
    }

    async fn enqueue_and_drain(&self, incoming: OrderBook) -> Result<()> {
        let symbol = incoming.symbol().to_string();
        let state = self.state_for(&symbol);

        // Enqueue first, then decide whether this call owns the fetch.
        let fetch = {
            let mut state = state.lock().expect("symbol state lock");
            state.pending.push_back(incoming);
            if state.full_book.is_none() && state.should_fetch && !state.snapshot_in_flight {
                state.snapshot_in_flight = true;
                true
            } else {
                false
            }
        };

        if fetch {
            let source = self.snapshots.as_ref().ok_or_else(|| {
                FeedError::Snapshot("no snapshot source configured for DeltaOnly feed".into())
            })?;
            match source.get_order_book(&symbol, self.max_count).await {
                Ok(mut snapshot) => {
                    let mut state = state.lock().expect("symbol state lock");
                    snapshot.prune();
                    snapshot.truncate_depth(self.max_count);
                    state.full_book = Some(snapshot);
                    state.should_fetch = false;
                    state.snapshot_in_flight = false;
                }
                Err(e) => {
                    // should_fetch stays latched: the next delta retries
                    let mut state = state.lock().expect("symbol state lock");
                    state.snapshot_in_flight = false;
                    return Err(e);
                }
            }
        }

        let emitted = {
            let mut state = state.lock().expect("symbol state lock");
            if state.snapshot_in_flight || state.full_book.is_none() {
                return Ok(());
            }
            let mut queue = std::mem::take(&mut state.pending);
            let book = match state.full_book.as_mut() {
                Some(book) => book,
                None => return Ok(()),
            };
            let mut changed = fetch;
            while let Some(delta) = queue.pop_front() {
                changed |= book.apply(&delta);
            }
            if !changed {
                return Ok(());
            }
            book.touch();
            book.clone()
        };
        self.emit(&emitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::orderbook::{Level, Side};

    fn book(sequence: i64, asks: &[(Decimal, Decimal)], bids: &[(Decimal, Decimal)]) -> OrderBook {
        let mut book = OrderBook::new("BTC-USD").with_sequence(sequence);
        for (price, amount) in asks {
            book.insert(Side::Ask, Level { price: *price, amount: *amount });
        }
        for (price, amount) in bids {
            book.insert(Side::Bid, Level { price: *price, amount: *amount });
        }
        book
    }

    fn collector() -> (BookCallback, Arc<Mutex<Vec<OrderBook>>>) {
        let emitted: Arc<Mutex<Vec<OrderBook>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = emitted.clone();
        let callback: BookCallback = Arc::new(move |book: &OrderBook| {
            sink.lock().unwrap().push(book.clone());
        });
        (callback, emitted)
    }

    struct FixedSnapshot(OrderBook);

    #[async_trait]
    impl SnapshotSource for FixedSnapshot {
        async fn get_order_book(&self, _symbol: &str, _max_count: usize) -> Result<OrderBook> {
            Ok(self.0.clone())
        }
    }

    /// Fails the first request, then serves the wrapped snapshot.
    struct FlakySnapshot {
        snapshot: OrderBook,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SnapshotSource for FlakySnapshot {
        async fn get_order_book(&self, _symbol: &str, _max_count: usize) -> Result<OrderBook> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err(FeedError::Snapshot("unavailable".into()))
            } else {
                Ok(self.snapshot.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_full_each_time_passthrough() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::FullEachTime, 100, None, callback);

        reconciler
            .on_increment(book(1, &[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .await
            .unwrap();
        reconciler
            .on_increment(book(2, &[(dec!(101), dec!(2))], &[(dec!(100), dec!(2))]))
            .await
            .unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].sequence_id(), 1);
        assert_eq!(emitted[0].best_ask(), Some(dec!(100)));
        assert_eq!(emitted[1].sequence_id(), 2);
        assert_eq!(emitted[1].best_bid(), Some(dec!(100)));
        assert!(emitted[1].last_updated() > chrono::DateTime::<chrono::Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_full_each_time_drops_stale_snapshot() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::FullEachTime, 100, None, callback);

        reconciler.on_increment(book(5, &[(dec!(100), dec!(1))], &[])).await.unwrap();
        reconciler.on_increment(book(4, &[(dec!(50), dec!(1))], &[])).await.unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].sequence_id(), 5);
    }

    #[tokio::test]
    async fn test_snapshot_then_delta_overwrite() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::SnapshotThenDelta, 100, None, callback);

        reconciler
            .on_increment(book(10, &[(dec!(5), dec!(5)), (dec!(6), dec!(6))], &[(dec!(4), dec!(4))]))
            .await
            .unwrap();
        reconciler
            .on_increment(book(11, &[(dec!(5), dec!(0))], &[(dec!(4), dec!(7))]))
            .await
            .unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        let second = &emitted[1];
        assert_eq!(second.sequence_id(), 11);
        assert_eq!(
            second.asks().collect::<Vec<_>>(),
            vec![Level { price: dec!(6), amount: dec!(6) }]
        );
        assert_eq!(
            second.bids().collect::<Vec<_>>(),
            vec![Level { price: dec!(4), amount: dec!(7) }]
        );
    }

    #[tokio::test]
    async fn test_stale_delta_no_emission() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::SnapshotThenDelta, 100, None, callback);

        reconciler.on_increment(book(50, &[(dec!(10), dec!(1))], &[])).await.unwrap();
        reconciler.on_increment(book(49, &[(dec!(1), dec!(1))], &[])).await.unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].sequence_id(), 50);
        assert_eq!(emitted[0].best_ask(), Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_delta_only_queue_before_snapshot() {
        let (callback, emitted) = collector();
        let snapshot = book(100, &[(dec!(10), dec!(1)), (dec!(11), dec!(1))], &[]);
        let reconciler = BookReconciler::new(
            Dialect::DeltaOnly,
            100,
            Some(Arc::new(FixedSnapshot(snapshot))),
            callback,
        );

        // Delta arrives before the snapshot; its delete must survive the
        // snapshot install.
        reconciler.on_increment(book(101, &[(dec!(10), dec!(0))], &[])).await.unwrap();
        reconciler.on_increment(book(102, &[(dec!(11), dec!(2))], &[])).await.unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].sequence_id(), 101);
        assert_eq!(
            emitted[0].asks().collect::<Vec<_>>(),
            vec![Level { price: dec!(11), amount: dec!(1) }]
        );
        assert_eq!(emitted[1].sequence_id(), 102);
        assert_eq!(
            emitted[1].asks().collect::<Vec<_>>(),
            vec![Level { price: dec!(11), amount: dec!(2) }]
        );
    }

    #[tokio::test]
    async fn test_delta_only_snapshot_failure_latches_retry() {
        let (callback, emitted) = collector();
        let source = Arc::new(FlakySnapshot {
            snapshot: book(100, &[(dec!(9), dec!(1))], &[]),
            calls: Mutex::new(0),
        });
        let reconciler =
            BookReconciler::new(Dialect::DeltaOnly, 100, Some(source.clone()), callback);

        let result = reconciler.on_increment(book(101, &[(dec!(10), dec!(1))], &[])).await;
        assert!(result.is_err());
        assert!(emitted.lock().unwrap().is_empty());

        // The next delta retries the fetch; both queued deltas then drain
        // in arrival order.
        reconciler.on_increment(book(102, &[(dec!(10), dec!(2))], &[])).await.unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 2);

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].sequence_id(), 102);
        let asks: Vec<Level> = emitted[0].asks().collect();
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[0].price, dec!(9));
        assert_eq!(asks[1].price, dec!(10));
    }

    #[tokio::test]
    async fn test_emitted_sequence_is_monotonic() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::SnapshotThenDelta, 100, None, callback);

        for sequence in [10, 12, 11, 15, 14, 15, 20] {
            let amount = Decimal::from(sequence);
            reconciler
                .on_increment(book(sequence, &[(dec!(10), amount)], &[]))
                .await
                .unwrap();
        }

        let emitted = emitted.lock().unwrap();
        let sequences: Vec<i64> = emitted.iter().map(|b| b.sequence_id()).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sequences, sorted);
    }

    #[tokio::test]
    async fn test_no_nonpositive_levels_emitted() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::SnapshotThenDelta, 100, None, callback);

        reconciler
            .on_increment(book(1, &[(dec!(5), dec!(5)), (dec!(6), dec!(0))], &[(dec!(0), dec!(2))]))
            .await
            .unwrap();
        reconciler
            .on_increment(book(2, &[(dec!(7), dec!(1)), (dec!(5), dec!(0))], &[]))
            .await
            .unwrap();

        for book in emitted.lock().unwrap().iter() {
            for level in book.asks().chain(book.bids()) {
                assert!(level.amount > Decimal::ZERO);
                assert!(level.price > Decimal::ZERO);
            }
        }
    }

    #[tokio::test]
    async fn test_clear_forces_resync() {
        let (callback, emitted) = collector();
        let reconciler = BookReconciler::new(Dialect::SnapshotThenDelta, 100, None, callback);

        reconciler.on_increment(book(10, &[(dec!(5), dec!(5))], &[])).await.unwrap();
        reconciler.clear();
        // After clear the next message re-seeds the full book, so an
        // otherwise-stale sequence is accepted as the new baseline.
        reconciler.on_increment(book(3, &[(dec!(7), dec!(7))], &[])).await.unwrap();

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[1].sequence_id(), 3);
        assert_eq!(emitted[1].best_ask(), Some(dec!(7)));
    }
}
