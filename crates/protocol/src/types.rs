//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Header carrying the caller identity when it is a hosted app
pub const APP_ID_HEADER: &str = "kikx-app-id";

/// Header carrying the caller identity when it is a shell (browser tab) client
pub const CLIENT_ID_HEADER: &str = "kikx-client-id";

/// Session identity.
///
/// A shell client may start without an id; the host assigns one on the
/// first `connected` event and may rotate it on any later one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Client { id: Option<String> },
    App { id: String },
}

impl Identity {
    pub fn client(id: impl Into<String>) -> Self {
        Identity::Client {
            id: Some(id.into()),
        }
    }

    pub fn unassigned_client() -> Self {
        Identity::Client { id: None }
    }

    pub fn app(id: impl Into<String>) -> Self {
        Identity::App { id: id.into() }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Identity::Client { id } => id.as_deref(),
            Identity::App { id } => Some(id),
        }
    }

    /// Header name used to stamp HTTP requests
    pub fn header_name(&self) -> &'static str {
        match self {
            Identity::Client { .. } => CLIENT_ID_HEADER,
            Identity::App { .. } => APP_ID_HEADER,
        }
    }

    /// WebSocket path (with query) for this identity
    pub fn socket_path(&self) -> String {
        match self {
            Identity::App { id } => format!("/app/{id}"),
            Identity::Client { id: Some(id) } => format!("/client?client_id={id}"),
            Identity::Client { id: None } => "/client".to_string(),
        }
    }

    /// Path segment of the function-call bridge for this identity
    pub fn func_endpoint(&self) -> &'static str {
        match self {
            Identity::Client { .. } => "client/func",
            Identity::App { .. } => "app/func",
        }
    }

    /// Same kind, new id. Used when the host rotates the identity.
    pub fn rotated(&self, id: String) -> Self {
        match self {
            Identity::Client { .. } => Identity::Client { id: Some(id) },
            Identity::App { .. } => Identity::App { id },
        }
    }
}

/// Status carried by a `handler-data` push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Started,
    Info,
    Output,
    Error,
    Ended,
    #[serde(other)]
    Unknown,
}

/// Iframe attributes the host wants applied to an app frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IframeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowfullscreen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrerpolicy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_follows_identity_kind() {
        assert_eq!(Identity::app("a1").socket_path(), "/app/a1");
        assert_eq!(
            Identity::client("c1").socket_path(),
            "/client?client_id=c1"
        );
        assert_eq!(Identity::unassigned_client().socket_path(), "/client");
    }

    #[test]
    fn rotation_keeps_kind() {
        let rotated = Identity::client("old").rotated("new".into());
        assert_eq!(rotated, Identity::client("new"));
        assert_eq!(rotated.header_name(), CLIENT_ID_HEADER);

        let rotated = Identity::app("old").rotated("new".into());
        assert_eq!(rotated.header_name(), APP_ID_HEADER);
        assert_eq!(rotated.func_endpoint(), "app/func");
    }

    #[test]
    fn unknown_status_does_not_fail_to_parse() {
        let status: HandlerStatus = serde_json::from_str("\"progress\"").unwrap();
        assert_eq!(status, HandlerStatus::Unknown);
        let status: HandlerStatus = serde_json::from_str("\"ended\"").unwrap();
        assert_eq!(status, HandlerStatus::Ended);
    }
}
