//! Host → Client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{HandlerStatus, IframeSpec};

/// Raw inbound envelope. Frames without an `event` are not dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of the `connected` handshake event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub config: Value,
}

impl ConnectedPayload {
    /// Identity assigned by the host, whichever kind it sent
    pub fn assigned_id(&self) -> Option<&str> {
        self.client_id.as_deref().or(self.app_id.as_deref())
    }
}

/// Status/output pair pushed for one handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerData {
    pub status: HandlerStatus,
    #[serde(default)]
    pub output: Value,
}

/// Payload of the `handler-data` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDataEvent {
    pub id: String,
    pub data: HandlerData,
}

/// Payload of the `signal` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub signal: String,
    #[serde(default)]
    pub data: Value,
}

/// Signals the client reacts to itself
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    UpdateUserSettings(Value),
    Other(SignalPayload),
}

impl From<SignalPayload> for Signal {
    fn from(payload: SignalPayload) -> Self {
        match payload.signal.as_str() {
            "update_user_settings" => Signal::UpdateUserSettings(payload.data),
            _ => Signal::Other(payload),
        }
    }
}

/// Payload of `app:notify`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNotify {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub msg: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub frames: Option<Vec<String>>,
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub display_even_active: bool,
}

/// Payload of `app:close`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppClose {
    pub name: String,
    pub id: String,
}

/// Response body of `POST /open-app`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAppResponse {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub iframe: IframeSpec,
}

/// Result of `tasks.sh`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

/// Typed view of the reserved inbound events
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected(ConnectedPayload),
    Reconnected,
    HandlerData(HandlerDataEvent),
    Signal(Signal),
    AppNotify(AppNotify),
    AppClose(AppClose),
    /// Any other event name, or a reserved one whose payload did not parse
    Other { event: String, payload: Value },
}

impl InboundEvent {
    pub fn parse(event: &str, payload: &Value) -> Self {
        let typed = match event {
            "connected" => serde_json::from_value(payload.clone())
                .ok()
                .map(InboundEvent::Connected),
            "reconnected" => Some(InboundEvent::Reconnected),
            "handler-data" => serde_json::from_value(payload.clone())
                .ok()
                .map(InboundEvent::HandlerData),
            "signal" => serde_json::from_value::<SignalPayload>(payload.clone())
                .ok()
                .map(|p| InboundEvent::Signal(p.into())),
            "app:notify" => serde_json::from_value(payload.clone())
                .ok()
                .map(InboundEvent::AppNotify),
            "app:close" => serde_json::from_value(payload.clone())
                .ok()
                .map(InboundEvent::AppClose),
            _ => None,
        };
        typed.unwrap_or_else(|| InboundEvent::Other {
            event: event.to_string(),
            payload: payload.clone(),
        })
    }
}
