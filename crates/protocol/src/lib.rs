//! Kikx Protocol
//!
//! Shared types for communication between the Kikx desktop host and the
//! shell or app clients it serves. Everything here is serialized as JSON,
//! either inside the `{event, payload}` WebSocket envelope or as HTTP bodies.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::{
    CloseAppRequest, FuncCall, FuncConfig, NotifyKind, NotifyRequest, OpenAppRequest,
    OutboundEnvelope,
};
pub use server::{
    AppClose, AppNotify, ConnectedPayload, Envelope, HandlerData, HandlerDataEvent, InboundEvent,
    OpenAppResponse, Signal, SignalPayload, TaskOutput,
};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
