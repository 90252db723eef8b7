//! Event subscription table.
//!
//! Maps an event name to an ordered list of callbacks. Registration order is
//! delivery order and duplicates are allowed. Dispatch is synchronous; a
//! subscriber that panics is logged and skipped so the rest still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

/// Callback invoked with an event payload
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

pub const WS_OPEN: &str = "ws:onopen";
pub const WS_CLOSE: &str = "ws:onclose";
pub const WS_ERROR: &str = "ws:onerror";
pub const WS_RECONNECT_FAILED: &str = "ws:reconnect_failed";

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<EventCallback>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Vec<EventCallback>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.table()
            .entry(event.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Deliver `data` to every subscriber of `event`. Returns how many ran to completion.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        // Snapshot so subscribers may register more callbacks while we dispatch
        let callbacks = match self.table().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    component = "events",
                    event = "events.subscriber.panicked",
                    name = %event,
                    index,
                    "Event subscriber panicked"
                );
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.table().get(event).map_or(0, Vec::len)
    }
}
