//! Per-caller subscription handle
//!
//! Tracks one hub subscription and deregisters it on close. The channel
//! is receive-only; the handle exposes Connected/Disconnected
//! notifications so consumers can react to transport transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::manager::HubClient;
use super::registry::ListenerCallback;
use super::ConnectionEvent;
use crate::error::{FeedError, Result};

type EventHandler = Box<dyn Fn() + Send + Sync>;

pub(crate) struct HandleShared {
    client: HubClient,
    function_full_name: String,
    callback: ListenerCallback,
    closed: AtomicBool,
    on_connected: Mutex<Option<EventHandler>>,
    on_disconnected: Mutex<Option<EventHandler>>,
}

impl HandleShared {
    pub(crate) fn new(client: HubClient, function_full_name: String, callback: ListenerCallback) -> Self {
        Self {
            client,
            function_full_name,
            callback,
            closed: AtomicBool::new(false),
            on_connected: Mutex::new(None),
            on_disconnected: Mutex::new(None),
        }
    }

    pub(crate) fn fire(&self, event: ConnectionEvent) {
        let slot = match event {
            ConnectionEvent::Connected => &self.on_connected,
            ConnectionEvent::Disconnected => &self.on_disconnected,
        };
        if let Some(handler) = slot.lock().expect("handle event lock").as_ref() {
            handler();
        }
    }
}

/// Caller-held handle for one hub subscription
///
/// Closing (or dropping) the handle deregisters its callback; in-flight
/// dispatches may still complete.
pub struct SubscriptionHandle {
    shared: Arc<HandleShared>,
}

impl SubscriptionHandle {
    pub(crate) fn new(shared: Arc<HandleShared>) -> Self {
        Self { shared }
    }

    /// Full hub method name this handle is listening on
    pub fn function_full_name(&self) -> &str {
        &self.shared.function_full_name
    }

    /// Replace the Connected notification handler
    pub fn on_connected(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_connected.lock().expect("handle event lock") = Some(Box::new(handler));
    }

    /// Replace the Disconnected notification handler
    pub fn on_disconnected(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_disconnected.lock().expect("handle event lock") = Some(Box::new(handler));
    }

    /// This channel is receive-only
    pub fn send(&self, _message: &str) -> Result<()> {
        Err(FeedError::NotSupported)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Deregister the subscription. Idempotent; never fails.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.client.release_handle(
            &self.shared,
            &self.shared.function_full_name,
            &self.shared.callback,
        );
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
