//! Order-book stream wrapper
//!
//! Ties a hub subscription to a per-subscription reconciler: decoded
//! frames go through the caller-supplied parse into the reconciler,
//! which emits reconciled full books to the user callback. One
//! reconciler per logical book subscription.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dialect::ExchangeProfile;
use crate::error::Result;
use crate::hub::{HubClient, ListenerCallback, SubscriptionHandle};
use crate::orderbook::{BookCallback, BookReconciler, OrderBook, SnapshotSource};

/// Exchange-specific payload parse, applied after wire decoding
pub type ParseBook = Arc<dyn Fn(&str) -> Result<OrderBook> + Send + Sync>;

/// One live order-book subscription
pub struct BookSubscription {
    handle: SubscriptionHandle,
    reconciler: Arc<BookReconciler>,
}

impl BookSubscription {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn reconciler(&self) -> &Arc<BookReconciler> {
        &self.reconciler
    }

    /// Deregister the subscription; idempotent
    pub fn close(&self) {
        self.handle.close();
    }
}

/// Subscribe to a hub order-book feed and reconcile it into full books.
///
/// `snapshots` is required for the DeltaOnly dialect and unused
/// otherwise. Per-frame parse and reconciliation failures are logged and
/// swallowed: one malformed frame must not tear the feed down.
pub async fn subscribe_order_books(
    client: &HubClient,
    function_name: &str,
    param_sets: Vec<Vec<Value>>,
    delay_between_invokes: Duration,
    profile: ExchangeProfile,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    parse: ParseBook,
    on_book: BookCallback,
) -> Result<BookSubscription> {
    let reconciler = Arc::new(BookReconciler::new(
        profile.dialect,
        profile.max_count,
        snapshots,
        on_book,
    ));

    let feed = reconciler.clone();
    let callback: ListenerCallback = Arc::new(move |payload: String| {
        let feed = feed.clone();
        let parse = parse.clone();
        async move {
            match parse(&payload) {
                Ok(book) => {
                    if let Err(e) = feed.on_increment(book).await {
                        warn!(error = %e, "book reconciliation failed");
                    }
                }
                Err(e) => debug!(error = %e, "dropping malformed book frame"),
            }
        }
        .boxed()
    });

    let handle = client
        .subscribe(function_name, param_sets, delay_between_invokes, callback)
        .await?;

    // Sequence continuity cannot be verified across a transport gap:
    // every reconnect starts the books over.
    let stale = reconciler.clone();
    handle.on_disconnected(move || stale.clear());

    Ok(BookSubscription { handle, reconciler })
}
