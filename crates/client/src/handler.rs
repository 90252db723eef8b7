//! Handler registry: routes `handler-data` pushes to per-task handlers.
//!
//! One session carries output for many remote tasks. Each task gets a
//! `Handler` with an opaque id that is sent along with the start request;
//! the host tags every status push with that id. Pushes for ids that are no
//! longer registered are dropped.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kikx_protocol::{new_id, HandlerData, HandlerDataEvent, HandlerStatus};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::Session;

/// Called with the `output` of one status push
pub type OutputCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Called with every status push, whatever its status
pub type DataCallback = Arc<dyn Fn(&HandlerData) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StatusCallbacks {
    started: Option<OutputCallback>,
    info: Option<OutputCallback>,
    output: Option<OutputCallback>,
    error: Option<OutputCallback>,
    ended: Option<OutputCallback>,
}

pub struct Handler {
    id: String,
    running: AtomicBool,
    status_callbacks: Mutex<StatusCallbacks>,
    subscribers: Mutex<Vec<DataCallback>>,
}

impl Handler {
    fn new() -> Self {
        Self {
            id: new_id(),
            running: AtomicBool::new(false),
            status_callbacks: Mutex::new(StatusCallbacks::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set by `started`, cleared by `error` and `ended`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set the callback for one status, replacing any earlier one.
    pub fn on_status<F>(&self, status: HandlerStatus, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let callback: OutputCallback = Arc::new(callback);
        let mut callbacks = lock(&self.status_callbacks);
        match status {
            HandlerStatus::Started => callbacks.started = Some(callback),
            HandlerStatus::Info => callbacks.info = Some(callback),
            HandlerStatus::Output => callbacks.output = Some(callback),
            HandlerStatus::Error => callbacks.error = Some(callback),
            HandlerStatus::Ended => callbacks.ended = Some(callback),
            HandlerStatus::Unknown => {
                debug!(
                    component = "handler",
                    event = "handler.callback.ignored",
                    handler_id = %self.id,
                    "No callback slot for unknown status"
                );
            }
        }
    }

    /// Subscribe to every push for this handler
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&HandlerData) + Send + Sync + 'static,
    {
        lock(&self.subscribers).push(Arc::new(callback));
    }

    /// Status dispatch first, then generic subscribers in registration order.
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn dispatch(&self, data: &HandlerData) {
        self.dispatch_status(data);

        let subscribers = lock(&self.subscribers).clone();
        for (index, subscriber) in subscribers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(data))).is_err() {
                warn!(
                    component = "handler",
                    event = "handler.subscriber.panicked",
                    handler_id = %self.id,
                    index,
                    "Handler subscriber panicked"
                );
            }
        }
    }

    fn dispatch_status(&self, data: &HandlerData) {
        let callback = {
            let callbacks = lock(&self.status_callbacks);
            match data.status {
                HandlerStatus::Started => {
                    self.running.store(true, Ordering::SeqCst);
                    callbacks.started.clone()
                }
                HandlerStatus::Info => callbacks.info.clone(),
                HandlerStatus::Output => callbacks.output.clone(),
                HandlerStatus::Error => {
                    self.running.store(false, Ordering::SeqCst);
                    callbacks.error.clone()
                }
                HandlerStatus::Ended => {
                    self.running.store(false, Ordering::SeqCst);
                    callbacks.ended.clone()
                }
                HandlerStatus::Unknown => None,
            }
        };

        let Some(callback) = callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&data.output))).is_err() {
            warn!(
                component = "handler",
                event = "handler.callback.panicked",
                handler_id = %self.id,
                status = ?data.status,
                "Status callback panicked"
            );
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Instance-owned handler table (cheap to Clone).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<Mutex<HashMap<String, Arc<Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a handler with a fresh id
    pub fn create(&self) -> Arc<Handler> {
        let handler = Arc::new(Handler::new());
        lock(&self.handlers).insert(handler.id.clone(), handler.clone());
        handler
    }

    pub fn get(&self, id: &str) -> Option<Arc<Handler>> {
        lock(&self.handlers).get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Handler>> {
        lock(&self.handlers).remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.handlers).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.handlers).is_empty()
    }

    /// Deliver one push. Returns false when the id is not registered.
    pub fn route(&self, event: &HandlerDataEvent) -> bool {
        // Release the table before dispatch so callbacks may remove handlers
        let Some(handler) = self.get(&event.id) else {
            debug!(
                component = "handler",
                event = "handler.route.unknown_id",
                handler_id = %event.id,
                "Dropping push for unregistered handler"
            );
            return false;
        };
        handler.dispatch(&event.data);
        true
    }

    /// Route the session's `handler-data` events through this registry
    pub fn attach(&self, session: &Session) {
        let registry = self.clone();
        session.on("handler-data", move |payload| {
            match serde_json::from_value::<HandlerDataEvent>(payload.clone()) {
                Ok(event) => {
                    registry.route(&event);
                }
                Err(e) => warn!(
                    component = "handler",
                    event = "handler.route.invalid_payload",
                    error = %e,
                    "Malformed handler-data payload"
                ),
            }
        });
    }
}
