//! Reconnecting session: one logical duplex channel to the host.
//!
//! A `Session` owns at most one live connection at a time. Each connection
//! runs as its own tokio task; the task reports open/message/close back into
//! the shared state, which decides whether to schedule a reconnect. Sends
//! are at-most-once: a frame written while the socket is not open is dropped.
//!
//! Phases: `Idle -> Connecting -> Open -> Closed -> Reconnecting -> Connecting ...`
//! ending in `PermanentlyFailed` once the attempt budget is spent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use kikx_protocol::{ConnectedPayload, Envelope, InboundEvent, OutboundEnvelope, Signal};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::events::{EventBus, WS_CLOSE, WS_ERROR, WS_OPEN, WS_RECONNECT_FAILED};
use crate::identity::SharedIdentity;
use crate::transport::{Connector, Transport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Closed,
    Reconnecting,
    PermanentlyFailed,
}

impl Phase {
    fn is_live(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Open)
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

struct SessionState {
    phase: Phase,
    /// Bumped for every connection; stale connection tasks compare against it
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
    settings: Value,
    app_config: Value,
}

struct SessionInner {
    socket_origin: String,
    identity: SharedIdentity,
    policy: ReconnectConfig,
    connector: Arc<dyn Connector>,
    events: EventBus,
    state: Mutex<SessionState>,
}

/// Handle to a reconnecting session (cheap to Clone).
///
/// Dropping the last handle disconnects: the live socket is closed and any
/// pending reconnect is cancelled.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _owner: Arc<SessionOwner>,
}

/// Shared by every `Session` handle but never by connection or timer tasks
struct SessionOwner(Arc<SessionInner>);

impl Drop for SessionOwner {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

impl Session {
    pub fn new(
        server_url: &str,
        identity: SharedIdentity,
        policy: ReconnectConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            socket_origin: socket_origin(server_url),
            identity,
            policy,
            connector,
            events: EventBus::new(),
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                generation: 0,
                outbound: None,
                reconnect_timer: None,
                reconnect_attempts: 0,
                settings: Value::Object(Default::default()),
                app_config: Value::Object(Default::default()),
            }),
        });
        Self {
            _owner: Arc::new(SessionOwner(inner.clone())),
            inner,
        }
    }

    pub fn identity(&self) -> &SharedIdentity {
        &self.inner.identity
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn on<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.on(event, callback);
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state().reconnect_attempts
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.state().reconnect_timer.is_some()
    }

    /// User settings adopted on `connected`, with signal updates merged in
    pub fn settings(&self) -> Value {
        self.inner.state().settings.clone()
    }

    /// App config adopted on `connected` (empty for shell clients)
    pub fn app_config(&self) -> Value {
        self.inner.state().app_config.clone()
    }

    /// URL the next connection will use
    pub fn socket_url(&self) -> String {
        self.inner.socket_url()
    }

    /// Open a connection unless one is already open or being opened.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Subscribe `on_connected` to the handshake and connect.
    ///
    /// Does nothing at all when a connection is already live.
    pub fn run<F>(&self, on_connected: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if self.phase().is_live() {
            return;
        }
        self.on("connected", on_connected);
        self.connect();
    }

    /// Serialize and write `message` if the socket is open.
    ///
    /// Returns `Ok(false)` when the frame was dropped because the socket is
    /// not open; nothing is queued for later.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<bool, SessionError> {
        let text = serde_json::to_string(message)?;
        Ok(self.inner.send_text(text))
    }

    pub fn send_event(&self, event: &str, payload: Value) -> Result<bool, SessionError> {
        self.send(&OutboundEnvelope::new(event, payload))
    }

    /// Hook for the host page regaining foreground visibility.
    ///
    /// Reconnects immediately when the socket is down, no reconnect is
    /// pending and the attempt budget is not exhausted.
    pub fn notify_visible(&self) -> bool {
        let should_connect = {
            let state = self.inner.state();
            !state.phase.is_live()
                && state.reconnect_timer.is_none()
                && state.reconnect_attempts < self.inner.policy.max_attempts
        };
        if should_connect {
            info!(
                component = "session",
                event = "ws.visibility.reconnect",
                "Page visible again, reconnecting"
            );
            self.inner.connect();
        }
        should_connect
    }

    /// Close on purpose. Cancels any pending reconnect and does not schedule one.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    #[cfg(test)]
    fn schedule_reconnect(&self) {
        self.inner.schedule_reconnect();
    }
}

fn socket_origin(server_url: &str) -> String {
    let trimmed = server_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn socket_url(&self) -> String {
        format!("{}{}", self.socket_origin, self.identity.load().socket_path())
    }

    fn connect(self: &Arc<Self>) {
        let generation = {
            let mut state = self.state();
            if state.phase.is_live() {
                debug!(
                    component = "session",
                    event = "ws.connect.skipped",
                    phase = ?state.phase,
                    "Connection already open or opening"
                );
                return;
            }
            state.phase = Phase::Connecting;
            state.generation += 1;
            state.generation
        };

        let url = self.socket_url();
        info!(
            component = "session",
            event = "ws.connect.started",
            url = %url,
            generation,
            "Connecting"
        );
        tokio::spawn(run_connection(self.clone(), generation, url));
    }

    fn send_text(&self, text: String) -> bool {
        let state = self.state();
        match (&state.phase, &state.outbound) {
            (Phase::Open, Some(tx)) => tx.send(Outgoing::Frame(text)).is_ok(),
            _ => {
                debug!(
                    component = "session",
                    event = "ws.send.dropped",
                    phase = ?state.phase,
                    "Socket not open, message dropped"
                );
                false
            }
        }
    }

    /// Returns false when this connection was superseded while opening.
    fn handle_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Outgoing>) -> bool {
        {
            let mut state = self.state();
            if state.generation != generation {
                return false;
            }
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            state.reconnect_attempts = 0;
            state.phase = Phase::Open;
            state.outbound = Some(outbound);
        }

        info!(
            component = "session",
            event = "ws.connection.opened",
            generation,
            "WebSocket connection opened"
        );
        self.events.emit(WS_OPEN, &Value::Null);
        true
    }

    fn handle_message(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    component = "session",
                    event = "ws.message.parse_failed",
                    error = %e,
                    payload_bytes = text.len(),
                    "Failed to parse inbound message"
                );
                return;
            }
        };

        let Some(event) = envelope.event.as_deref() else {
            return;
        };

        match InboundEvent::parse(event, &envelope.payload) {
            InboundEvent::Connected(connected) => self.adopt_connected(connected),
            InboundEvent::Reconnected => self.state().reconnect_attempts = 0,
            InboundEvent::Signal(Signal::UpdateUserSettings(update)) => self.merge_settings(update),
            InboundEvent::Other { event, .. } if event == "connected" => {
                warn!(
                    component = "session",
                    event = "ws.connected.invalid",
                    "Malformed connected payload"
                );
            }
            _ => {}
        }

        self.events.emit(event, &envelope.payload);
    }

    fn adopt_connected(&self, connected: ConnectedPayload) {
        if let Some(id) = connected.assigned_id() {
            if self.identity.adopt(id) {
                info!(
                    component = "session",
                    event = "ws.identity.adopted",
                    id = %id,
                    "Host assigned session identity"
                );
            }
        }

        let mut state = self.state();
        state.settings = connected.settings;
        state.app_config = connected.config;
    }

    fn merge_settings(&self, update: Value) {
        let Value::Object(update) = update else {
            return;
        };
        let mut state = self.state();
        if !state.settings.is_object() {
            state.settings = Value::Object(Default::default());
        }
        if let Value::Object(settings) = &mut state.settings {
            settings.extend(update);
        }
    }

    fn handle_error(&self, detail: String) {
        warn!(
            component = "session",
            event = "ws.connection.error",
            error = %detail,
            "WebSocket error"
        );
        self.events.emit(WS_ERROR, &json!({ "error": detail }));
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state();
            if state.generation != generation {
                debug!(
                    component = "session",
                    event = "ws.connection.stale_close",
                    generation,
                    "Ignoring close of a superseded connection"
                );
                return;
            }
            state.outbound = None;
            state.phase = Phase::Closed;
        }

        info!(
            component = "session",
            event = "ws.connection.closed",
            generation,
            "WebSocket closed"
        );
        self.events.emit(WS_CLOSE, &Value::Null);
        self.schedule_reconnect();
    }

    /// At most one timer is ever pending; the attempt budget bounds the total.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut state = self.state();
        if state.reconnect_timer.is_some() {
            debug!(
                component = "session",
                event = "ws.reconnect.already_scheduled",
                "Reconnect timer already set"
            );
            return;
        }

        if state.reconnect_attempts >= self.policy.max_attempts {
            let first_failure = state.phase != Phase::PermanentlyFailed;
            state.phase = Phase::PermanentlyFailed;
            drop(state);
            if first_failure {
                warn!(
                    component = "session",
                    event = "ws.reconnect.exhausted",
                    max_attempts = self.policy.max_attempts,
                    "Max reconnect attempts reached"
                );
                self.events.emit(WS_RECONNECT_FAILED, &Value::Null);
            }
            return;
        }

        state.reconnect_attempts += 1;
        state.phase = Phase::Reconnecting;
        let attempt = state.reconnect_attempts;
        let delay = self.policy.delay();
        info!(
            component = "session",
            event = "ws.reconnect.scheduled",
            attempt,
            delay_ms = self.policy.delay_ms,
            "Scheduling reconnect"
        );

        let inner = self.clone();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.state().reconnect_timer = None;
            inner.connect();
        }));
    }

    fn disconnect(&self) {
        let was_live = {
            let mut state = self.state();
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            let was_live = state.phase.is_live();
            // Orphan the running connection task so its close is ignored
            state.generation += 1;
            if let Some(tx) = state.outbound.take() {
                let _ = tx.send(Outgoing::Close);
            }
            if state.phase != Phase::Idle {
                state.phase = Phase::Closed;
            }
            was_live
        };

        if was_live {
            info!(
                component = "session",
                event = "ws.connection.closed_by_client",
                "WebSocket closed by client"
            );
            self.events.emit(WS_CLOSE, &json!({ "reason": "client" }));
        }
    }
}

async fn run_connection(inner: Arc<SessionInner>, generation: u64, url: String) {
    let Transport {
        mut incoming,
        mut outgoing,
    } = match inner.connector.connect(url).await {
        Ok(transport) => transport,
        Err(e) => {
            inner.handle_error(e.to_string());
            inner.handle_close(generation);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    if !inner.handle_open(generation, outbound_tx) {
        let _ = outgoing.close().await;
        return;
    }

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(text)) => inner.handle_message(&text),
                Some(Err(e)) => {
                    inner.handle_error(e.to_string());
                    break;
                }
                None => break,
            },
            out = outbound_rx.recv() => match out {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = outgoing.send(text).await {
                        inner.handle_error(e.to_string());
                        break;
                    }
                }
                Some(Outgoing::Close) | None => break,
            },
        }
    }

    let _ = outgoing.close().await;
    inner.handle_close(generation);
}
