//! Client → Host messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope written to the socket by `send()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl OutboundEnvelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Positional and keyword arguments of a function-call bridge request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncConfig {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl FuncConfig {
    pub fn args<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            options: Map::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Body of `POST app/func` / `POST client/func`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: String,
    pub config: FuncConfig,
}

/// Body of `POST /open-app`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAppRequest {
    pub client_id: Option<String>,
    pub name: String,
}

/// Body of `POST /close-app`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAppRequest {
    pub app_id: String,
    pub client_id: Option<String>,
}

/// Body of `POST notify` on the system namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: NotifyKind,
    #[serde(default)]
    pub delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<String>>,
    #[serde(default)]
    pub display_even_active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    #[default]
    Info,
    Error,
}

impl NotifyRequest {
    pub fn info(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            kind: NotifyKind::Info,
            delay: 0,
            frames: None,
            display_even_active: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notify_body_uses_host_field_names() {
        let mut notify = NotifyRequest::info("build finished");
        notify.display_even_active = true;
        assert_eq!(
            serde_json::to_value(&notify).unwrap(),
            json!({"msg": "build finished", "type": "info", "delay": 0, "displayEvenActive": true})
        );
    }

    #[test]
    fn func_call_body_shape() {
        let call = FuncCall {
            name: "tasks.run_task".into(),
            config: FuncConfig::args(["echo hi"]).option("handler_id", "h-1"),
        };
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "name": "tasks.run_task",
                "config": { "args": ["echo hi"], "options": { "handler_id": "h-1" } }
            })
        );
    }
}
