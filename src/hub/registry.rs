//! Hub subscription registry
//!
//! In-memory mapping of hub function name to subscription parameters and
//! the fan-out callback list. Listeners are keyed by the lowercased full
//! function name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Async callback receiving the decoded payload of one frame
pub type ListenerCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered callback with its ordered delivery queue
struct CallbackSlot {
    callback: ListenerCallback,
    queue: mpsc::UnboundedSender<String>,
}

impl CallbackSlot {
    /// Each callback drains its own queue on a dedicated worker: frames
    /// for one callback are processed in arrival order, while a slow or
    /// panicking callback cannot hold back its peers.
    fn new(callback: ListenerCallback) -> Self {
        let (queue, mut frames) = mpsc::unbounded_channel::<String>();
        let worker = callback.clone();
        tokio::spawn(async move {
            while let Some(payload) = frames.recv().await {
                if tokio::spawn(worker(payload)).await.is_err() {
                    debug!("listener callback panicked");
                }
            }
        });
        Self { callback, queue }
    }
}

/// One named server event with its recorded invocation parameters and
/// fan-out callbacks
pub struct HubListener {
    pub function_name: String,
    pub function_full_name: String,
    /// Argument lists re-invoked after every (re)connect
    pub param_sets: Vec<Vec<Value>>,
    callbacks: Vec<CallbackSlot>,
}

/// Registry of hub listeners with case-insensitive name resolution
pub struct SubscriptionRegistry {
    /// Lowercased short name -> fully qualified hub method name
    name_map: HashMap<String, String>,
    listeners: Mutex<HashMap<String, HubListener>>,
}

impl SubscriptionRegistry {
    pub fn new(name_map: HashMap<String, String>) -> Self {
        Self {
            name_map: name_map
                .into_iter()
                .map(|(short, full)| (short.to_lowercase(), full))
                .collect(),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a short function name to its full hub method name.
    /// Unknown names resolve to themselves.
    pub fn resolve(&self, function_name: &str) -> String {
        self.name_map
            .get(&function_name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| function_name.to_string())
    }

    /// Register a callback under a function name; returns the full name.
    ///
    /// Creates the listener if absent. Param sets not already recorded
    /// are appended so each is replayed exactly once per reconnect.
    pub fn add_listener(
        &self,
        function_name: &str,
        callback: ListenerCallback,
        param_sets: Vec<Vec<Value>>,
    ) -> String {
        let full_name = self.resolve(function_name);
        let key = full_name.to_lowercase();
        let mut listeners = self.listeners.lock().expect("registry lock");
        let listener = listeners.entry(key).or_insert_with(|| HubListener {
            function_name: function_name.to_string(),
            function_full_name: full_name.clone(),
            param_sets: Vec::new(),
            callbacks: Vec::new(),
        });
        for params in param_sets {
            if !listener.param_sets.contains(&params) {
                listener.param_sets.push(params);
            }
        }
        if !listener
            .callbacks
            .iter()
            .any(|slot| Arc::ptr_eq(&slot.callback, &callback))
        {
            listener.callbacks.push(CallbackSlot::new(callback));
        }
        full_name
    }

    /// Remove a callback; drops the listener when its callback list
    /// empties. Returns true when the whole registry became empty.
    pub fn remove_listener(&self, function_full_name: &str, callback: &ListenerCallback) -> bool {
        let key = function_full_name.to_lowercase();
        let mut listeners = self.listeners.lock().expect("registry lock");
        if let Some(listener) = listeners.get_mut(&key) {
            listener
                .callbacks
                .retain(|slot| !Arc::ptr_eq(&slot.callback, callback));
            if listener.callbacks.is_empty() {
                listeners.remove(&key);
            }
        }
        listeners.is_empty()
    }

    /// Fan one decoded frame out to every callback of the named
    /// listener. The queue senders are snapshotted under the lock and
    /// the frame enqueued outside it; every callback sees the frame
    /// exactly once, in arrival order.
    pub fn dispatch(&self, function_full_name: &str, payload: &str) {
        let queues: Vec<mpsc::UnboundedSender<String>> = {
            let listeners = self.listeners.lock().expect("registry lock");
            match listeners.get(&function_full_name.to_lowercase()) {
                Some(listener) => listener
                    .callbacks
                    .iter()
                    .map(|slot| slot.queue.clone())
                    .collect(),
                None => {
                    debug!(function = function_full_name, "frame for unknown listener");
                    return;
                }
            }
        };
        for queue in queues {
            let _ = queue.send(payload.to_string());
        }
    }

    /// (full name, param sets) of every listener, for reconnect replay
    pub fn replay_snapshot(&self) -> Vec<(String, Vec<Vec<Value>>)> {
        let listeners = self.listeners.lock().expect("registry lock");
        listeners
            .values()
            .map(|l| (l.function_full_name.clone(), l.param_sets.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().expect("registry lock").is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().expect("registry lock").len()
    }
}
