//! Hub connection manager
//!
//! Owns the single realtime session, fans inbound frames out through the
//! subscription registry, and transparently recovers from transport
//! loss, replaying every recorded subscription after each (re)connect.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, OwnedMutexGuard};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backoff::ReconnectBackoff;
use super::handle::{HandleShared, SubscriptionHandle};
use super::protocol::{HubFrame, HubInvocation};
use super::registry::{ListenerCallback, SubscriptionRegistry};
use super::transport::{RealtimeTransport, TransportFactory, WebSocketTransport};
use super::{ConnectionEvent, ConnectionState};
use crate::codec::decode_frame;
use crate::config::HubConfig;
use crate::error::{FeedError, Result};

type InvokeOutcome = std::result::Result<Value, String>;

/// Client for one hub endpoint. Cheap to clone; all clones share the
/// same connection.
pub struct HubClient {
    inner: Arc<HubInner>,
}

impl Clone for HubClient {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct HubInner {
    config: HubConfig,
    registry: SubscriptionRegistry,
    transport_factory: TransportFactory,
    state_tx: watch::Sender<ConnectionState>,
    /// true requests the run loop to stand down
    stop_tx: watch::Sender<bool>,
    /// Present while a session is up; frames queued here are written by
    /// the session pump
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<InvokeOutcome>>>,
    invoke_seq: AtomicU64,
    handles: Mutex<Vec<Weak<HandleShared>>>,
    /// Single-holder guard: the run loop owns this for its lifetime, so
    /// overlapping reconnect triggers are no-ops
    run_gate: Arc<tokio::sync::Mutex<()>>,
    disposed: AtomicBool,
}

impl HubClient {
    /// Client with the default WebSocket transport
    pub fn new(config: HubConfig, name_map: HashMap<String, String>) -> Self {
        let hub = config.hub.clone();
        let factory: TransportFactory =
            Arc::new(move || Box::new(WebSocketTransport::new(&hub)) as Box<dyn RealtimeTransport>);
        Self::with_transport(config, name_map, factory)
    }

    /// Client over a custom transport factory
    pub fn with_transport(
        config: HubConfig,
        name_map: HashMap<String, String>,
        transport_factory: TransportFactory,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                config,
                registry: SubscriptionRegistry::new(name_map),
                transport_factory,
                state_tx,
                stop_tx,
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                invoke_seq: AtomicU64::new(1),
                handles: Mutex::new(Vec::new()),
                run_gate: Arc::new(tokio::sync::Mutex::new(())),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(FeedError::Closed)
        } else {
            Ok(())
        }
    }

    /// Bring the connection up, starting the run loop if needed; blocks
    /// until Connected or the connect timeout elapses.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state_rx = self.inner.state_tx.subscribe();
        let client = self.clone();
        let wait = async move {
            // The spawn is retried on a short ticker: a run loop that is
            // still winding down holds the gate for a moment after it
            // was told to stop.
            let mut retry = interval(Duration::from_millis(50));
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Connected {
                    return Ok(());
                }
                if client.inner.disposed.load(Ordering::SeqCst) {
                    return Err(FeedError::Closed);
                }
                client.spawn_run_loop();
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return Err(FeedError::Closed);
                        }
                    }
                    _ = retry.tick() => {}
                }
            }
        };
        timeout(self.inner.config.connect_timeout(), wait)
            .await
            .map_err(|_| FeedError::ConnectionTimeout)?
    }

    fn spawn_run_loop(&self) {
        // try_lock: at most one run loop (and thus one reconnect
        // sequence) process-wide
        let Ok(gate) = self.inner.run_gate.clone().try_lock_owned() else {
            return;
        };
        self.inner.stop_tx.send_replace(false);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            HubInner::run(inner, gate).await;
        });
    }

    /// Subscribe to a named hub event.
    ///
    /// Ensures the connection is up, registers the listener before
    /// invoking so early frames are not lost, then invokes each param
    /// set with `delay_between_invokes` between calls (exchanges
    /// disconnect when invoked too fast). Any failed invocation
    /// deregisters the listener and propagates.
    pub async fn subscribe(
        &self,
        function_name: &str,
        param_sets: Vec<Vec<Value>>,
        delay_between_invokes: Duration,
        callback: ListenerCallback,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        self.connect().await?;

        let full_name =
            self.inner
                .registry
                .add_listener(function_name, callback.clone(), param_sets.clone());

        for (index, args) in param_sets.iter().enumerate() {
            if index > 0 {
                sleep(delay_between_invokes).await;
            }
            if let Err(e) = self.inner.invoke_checked(&full_name, args.clone()).await {
                self.release_listener(&full_name, &callback);
                return Err(e);
            }
        }

        let shared = Arc::new(HandleShared::new(self.clone(), full_name, callback));
        self.inner
            .handles
            .lock()
            .expect("handle set lock")
            .push(Arc::downgrade(&shared));
        Ok(SubscriptionHandle::new(shared))
    }

    /// Invoke a hub method and await its result
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_open()?;
        self.inner.invoke(method, args).await
    }

    /// Request the authentication challenge for an API key
    pub async fn get_auth_context(&self, api_key: &str) -> Result<String> {
        let value = self.invoke("GetAuthContext", vec![json!(api_key)]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FeedError::Invoke("GetAuthContext returned no challenge".into()))
    }

    /// Present a signed challenge; see [`crate::auth::sign_challenge`]
    pub async fn authenticate(&self, api_key: &str, signed_challenge: &str) -> Result<bool> {
        let value = self
            .invoke("Authenticate", vec![json!(api_key), json!(signed_challenge)])
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Tear down the client. Idempotent; post-close operations fail with
    /// [`FeedError::Closed`].
    pub async fn close(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_tx.send_replace(true);
        self.inner.fail_pending("client closed");
        self.inner.handles.lock().expect("handle set lock").clear();
    }

    pub(crate) fn release_handle(
        &self,
        shared: &Arc<HandleShared>,
        function_full_name: &str,
        callback: &ListenerCallback,
    ) {
        {
            let mut handles = self.inner.handles.lock().expect("handle set lock");
            handles.retain(|weak| {
                weak.upgrade()
                    .map(|other| !Arc::ptr_eq(&other, shared))
                    .unwrap_or(false)
            });
        }
        self.release_listener(function_full_name, callback);
    }

    fn release_listener(&self, function_full_name: &str, callback: &ListenerCallback) {
        if self.inner.registry.remove_listener(function_full_name, callback) {
            // Last listener gone: stand the feed down. The client stays
            // usable; a later subscribe restarts the loop.
            self.inner.stop_tx.send_replace(true);
        }
    }
}

impl HubInner {
    async fn run(inner: Arc<HubInner>, _gate: OwnedMutexGuard<()>) {
        let mut backoff = ReconnectBackoff::new(
            inner.config.reconnect_delay(),
            inner.config.reconnect_delay_max(),
            inner.config.reconnect_jitter_ms,
        );
        let mut stop_rx = inner.stop_tx.subscribe();

        loop {
            if inner.disposed.load(Ordering::SeqCst) || *stop_rx.borrow_and_update() {
                break;
            }

            inner.set_state(ConnectionState::Connecting);
            let mut transport = (inner.transport_factory)();
            match transport.start(&inner.config.url).await {
                Ok(()) => {
                    backoff.reset();
                    let (out_tx, out_rx) = mpsc::channel(64);
                    *inner.outbound.lock().expect("outbound lock") = Some(out_tx);
                    inner.set_state(ConnectionState::Connected);

                    // The replay runs beside the pump because its
                    // invocations need the pump to route their
                    // responses, but the pump holds named events back
                    // until the gate opens: every recorded param set is
                    // re-invoked before any user callback sees a frame.
                    let (replay_tx, mut replay_rx) = watch::channel(false);
                    let replayer = inner.clone();
                    tokio::spawn(async move {
                        replayer.replay_subscriptions().await;
                        replay_tx.send_replace(true);
                        replayer.notify_handles(ConnectionEvent::Connected);
                    });

                    inner
                        .pump(transport.as_mut(), out_rx, &mut stop_rx, &mut replay_rx)
                        .await;

                    transport.stop().await;
                    inner.outbound.lock().expect("outbound lock").take();
                    inner.fail_pending("connection lost");
                    inner.set_state(ConnectionState::Disconnected);
                    inner.notify_handles(ConnectionEvent::Disconnected);
                }
                Err(e) => {
                    warn!(error = %e, "hub connection attempt failed");
                    inner.set_state(ConnectionState::Disconnected);
                }
            }

            if inner.disposed.load(Ordering::SeqCst) || *stop_rx.borrow_and_update() {
                break;
            }
            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting hub");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop_rx.changed() => {}
            }
        }

        inner.set_state(ConnectionState::Disconnected);
    }

    /// Drive one session: outbound writes, inbound dispatch, keep-alive.
    ///
    /// Named events received before the subscription replay completes
    /// are buffered and flushed in arrival order once it does;
    /// invocation results always pass through so the replay's own calls
    /// can resolve.
    async fn pump(
        &self,
        transport: &mut dyn RealtimeTransport,
        mut out_rx: mpsc::Receiver<String>,
        stop_rx: &mut watch::Receiver<bool>,
        replay_rx: &mut watch::Receiver<bool>,
    ) {
        let mut keepalive = interval(self.config.keepalive_interval());
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut replayed = *replay_rx.borrow_and_update();
        let mut deferred: VecDeque<String> = VecDeque::new();

        loop {
            // Flush before selecting again so no later frame can be
            // dispatched ahead of one still in the buffer.
            if replayed && !deferred.is_empty() {
                for text in deferred.drain(..) {
                    self.handle_frame(&text, true);
                }
            }

            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                // Fires when the replay finishes; the sender dropping
                // means the same thing.
                _ = replay_rx.changed(), if !replayed => {
                    replayed = true;
                }
                outbound = out_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = transport.send_text(&text).await {
                            warn!(error = %e, "hub send failed");
                            break;
                        }
                    }
                    None => break,
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(text)) => {
                        if self.handle_frame(&text, replayed) {
                            deferred.push_back(text);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "hub transport lost");
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if let Err(e) = transport.ping().await {
                        warn!(error = %e, "hub keepalive failed");
                        break;
                    }
                }
            }
        }
    }

    /// Route one inbound frame: invocation results resolve their
    /// waiters; named events pass through the wire decoder to the
    /// registry. Returns true when the frame carries events but
    /// `dispatch_ready` is false, in which case the caller buffers the
    /// raw frame until the replay gate opens. Malformed frames are
    /// dropped, never fatal.
    fn handle_frame(&self, text: &str, dispatch_ready: bool) -> bool {
        let frame: HubFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "unparseable hub frame");
                return false;
            }
        };

        if let Some(id) = &frame.invoke_id {
            let waiter = self.pending.lock().expect("pending invoke lock").remove(id);
            if let Some(waiter) = waiter {
                let outcome = match frame.error {
                    Some(err) => Err(err),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(outcome);
            }
            return false;
        }

        if frame.events.is_empty() {
            return false;
        }
        if !dispatch_ready {
            return true;
        }

        for event in &frame.events {
            let Some(wire) = event.args.first().and_then(Value::as_str) else {
                debug!(method = %event.method, "event without string payload");
                continue;
            };
            match decode_frame(wire) {
                Ok(payload) => self.registry.dispatch(&event.method, &payload),
                Err(e) => {
                    debug!(error = %e, method = %event.method, "dropping undecodable frame");
                }
            }
        }
        false
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.invoke_seq.fetch_add(1, Ordering::SeqCst).to_string();
        let wire = serde_json::to_string(&HubInvocation {
            hub: &self.config.hub,
            method,
            args,
            id: id.clone(),
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending invoke lock")
            .insert(id.clone(), reply_tx);

        let sender = self.outbound.lock().expect("outbound lock").clone();
        let Some(sender) = sender else {
            self.pending.lock().expect("pending invoke lock").remove(&id);
            return Err(FeedError::Transport("not connected".into()));
        };
        if sender.send(wire).await.is_err() {
            self.pending.lock().expect("pending invoke lock").remove(&id);
            return Err(FeedError::Transport("connection lost".into()));
        }

        match timeout(self.config.invoke_timeout(), reply_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(FeedError::Invoke(err)),
            Ok(Err(_)) => Err(FeedError::Transport("connection lost during invoke".into())),
            Err(_) => {
                self.pending.lock().expect("pending invoke lock").remove(&id);
                Err(FeedError::Invoke(format!("invoke '{}' timed out", method)))
            }
        }
    }

    /// Invoke where the hub signals refusal by returning false
    async fn invoke_checked(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let value = self.invoke(method, args).await?;
        if value == Value::Bool(false) {
            return Err(FeedError::Invoke("invoke returned false".into()));
        }
        Ok(())
    }

    /// Re-invoke every recorded param set of every listener. Failures
    /// here log and continue: a partially replayed feed beats a torn
    /// down one.
    async fn replay_subscriptions(&self) {
        for (full_name, param_sets) in self.registry.replay_snapshot() {
            for (index, args) in param_sets.into_iter().enumerate() {
                if index > 0 {
                    sleep(self.config.replay_invoke_delay()).await;
                }
                match self.invoke_checked(&full_name, args).await {
                    Ok(()) => debug!(function = %full_name, "subscription replayed"),
                    Err(e) => info!(function = %full_name, error = %e, "subscription replay failed"),
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn fail_pending(&self, reason: &str) {
        let waiters: Vec<oneshot::Sender<InvokeOutcome>> = {
            let mut pending = self.pending.lock().expect("pending invoke lock");
            pending.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    /// Fan a transition out to open handles from a snapshot of the
    /// handle set, outside any lock, so a handler calling back into
    /// subscribe/close cannot deadlock.
    fn notify_handles(&self, event: ConnectionEvent) {
        let snapshot: Vec<Arc<HandleShared>> = {
            let mut handles = self.handles.lock().expect("handle set lock");
            handles.retain(|weak| weak.strong_count() > 0);
            handles.iter().filter_map(Weak::upgrade).collect()
        };
        for handle in snapshot {
            handle.fire(event);
        }
    }
}
