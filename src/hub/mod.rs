//! Realtime hub client
//!
//! A persistent hub connection supporting multiple named subscriptions
//! with automatic reconnect, replay of recorded subscriptions, and
//! payload decoding.

mod backoff;
mod handle;
mod manager;
mod protocol;
mod registry;
mod transport;

pub use backoff::ReconnectBackoff;
pub use handle::SubscriptionHandle;
pub use manager::HubClient;
pub use registry::{HubListener, ListenerCallback, SubscriptionRegistry};
pub use transport::{RealtimeTransport, TransportFactory, WebSocketTransport};

/// Connection lifecycle of the hub client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transition notification delivered to open handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}
