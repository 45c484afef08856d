//! bookfeed
//!
//! Live order-book reconstruction for cryptocurrency exchanges. Unifies
//! the three observed delivery dialects (delta-only, snapshot-then-delta,
//! full-each-time) into a single monotonic full-book stream per symbol,
//! fed by a realtime hub client with automatic reconnect and
//! subscription replay.

pub mod auth;
pub mod codec;
pub mod config;
pub mod dialect;
pub mod error;
pub mod hub;
pub mod orderbook;
pub mod parser;
pub mod stream;

pub use auth::sign_challenge;
pub use codec::decode_frame;
pub use config::HubConfig;
pub use dialect::{Dialect, ExchangeDirectory, ExchangeProfile};
pub use error::{FeedError, Result};
pub use hub::{
    ConnectionEvent, ConnectionState, HubClient, ListenerCallback, RealtimeTransport,
    SubscriptionHandle, WebSocketTransport,
};
pub use orderbook::{BookCallback, BookReconciler, Level, OrderBook, Side, SnapshotSource};
pub use parser::{parse_keyed_book, parse_positional_book, BookFields};
pub use stream::{subscribe_order_books, BookSubscription, ParseBook};
