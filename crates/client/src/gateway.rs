//! Request gateway: uniform HTTP request/response wrapper.
//!
//! Every request is stamped with the current session identity header and
//! every outcome, including transport failures, comes back as an
//! `ApiResult`. Nothing here returns an error; callers branch on `ok`.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::identity::SharedIdentity;

/// Outgoing body. `Json` is serialized and labelled; the rest pass through.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Raw {
        bytes: Bytes,
        content_type: Option<String>,
    },
    Multipart(reqwest::multipart::Form),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

/// Parsed response body, chosen by content type
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    Message(String),
    Body(Value),
    /// Non-empty binary error body, kept as received
    Binary(Bytes),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Message(message) => f.write_str(message),
            ApiError::Body(body) => write!(f, "{body}"),
            ApiError::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Normalized outcome of a gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub ok: bool,
    pub code: u16,
    pub content_type: Option<String>,
    pub data: Option<ResponseData>,
    pub error: Option<ApiError>,
}

impl ApiResult {
    /// Network or parse failure, reported the same way as a server error
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: 500,
            content_type: None,
            data: None,
            error: Some(ApiError::Message(message.into())),
        }
    }

    fn from_parts(code: u16, ok: bool, content_type: Option<String>, data: Option<ResponseData>) -> Self {
        if ok {
            return Self {
                ok,
                code,
                content_type,
                data,
                error: None,
            };
        }

        let error = match data {
            Some(ResponseData::Json(Value::Null)) | None => {
                ApiError::Message(format!("Error {code}"))
            }
            Some(ResponseData::Json(body)) => ApiError::Body(body),
            Some(ResponseData::Binary(bytes)) if bytes.is_empty() => {
                ApiError::Message(format!("Error {code}"))
            }
            Some(ResponseData::Binary(bytes)) => ApiError::Binary(bytes),
            Some(ResponseData::Text(text)) if text.is_empty() => {
                ApiError::Message(format!("Error {code}"))
            }
            Some(ResponseData::Text(text)) => ApiError::Message(text),
        };
        Self {
            ok,
            code,
            content_type,
            data: None,
            error: Some(error),
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.data {
            Some(ResponseData::Json(value)) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.data {
            Some(ResponseData::Text(text)) => Some(text),
            Some(ResponseData::Json(Value::String(text))) => Some(text),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.data {
            Some(ResponseData::Binary(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Deserialize a JSON body into `T`
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        self.json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Human-readable error. Object bodies report their `detail` field.
    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(|error| match error {
            ApiError::Message(message) => message.clone(),
            ApiError::Body(Value::Object(body)) => match body.get("detail") {
                Some(Value::String(detail)) => detail.clone(),
                Some(detail) => detail.to_string(),
                None => Value::Object(body.clone()).to_string(),
            },
            ApiError::Body(body) => body.to_string(),
            ApiError::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        })
    }
}

/// Gateway over one path prefix of the host: the root, or `/service/{name}`.
#[derive(Clone)]
pub struct RequestGateway {
    http: reqwest::Client,
    origin: String,
    base_path: String,
    identity: SharedIdentity,
}

impl RequestGateway {
    pub fn new(http: reqwest::Client, server_url: &str, identity: SharedIdentity) -> Self {
        Self {
            http,
            origin: server_url.trim_end_matches('/').to_string(),
            base_path: String::new(),
            identity,
        }
    }

    /// Gateway for the `/service/{name}` namespace, sharing client and identity
    pub fn service(&self, name: &str) -> Self {
        Self {
            http: self.http.clone(),
            origin: self.origin.clone(),
            base_path: format!("/service/{name}"),
            identity: self.identity.clone(),
        }
    }

    pub fn identity(&self) -> &SharedIdentity {
        &self.identity
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}/{}",
            self.origin,
            self.base_path,
            endpoint.trim_start_matches('/')
        )
    }

    pub async fn request(&self, endpoint: &str, method: Method, body: RequestBody) -> ApiResult {
        self.request_with_headers(endpoint, method, HeaderMap::new(), body)
            .await
    }

    pub async fn get(&self, endpoint: &str) -> ApiResult {
        self.request(endpoint, Method::GET, RequestBody::Empty).await
    }

    pub async fn post_json(&self, endpoint: &str, body: Value) -> ApiResult {
        self.request(endpoint, Method::POST, RequestBody::Json(body))
            .await
    }

    pub async fn request_with_headers(
        &self,
        endpoint: &str,
        method: Method,
        headers: HeaderMap,
        body: RequestBody,
    ) -> ApiResult {
        let url = self.url(endpoint);
        let builder = self.build(&url, method.clone(), headers, body);

        match execute(builder).await {
            Ok(result) => {
                debug!(
                    component = "gateway",
                    event = "http.request.completed",
                    method = %method,
                    url = %url,
                    code = result.code,
                    ok = result.ok,
                );
                result
            }
            Err(e) => {
                warn!(
                    component = "gateway",
                    event = "http.request.failed",
                    method = %method,
                    url = %url,
                    error = %e,
                    "Request failed before a response was parsed"
                );
                ApiResult::failure(e.to_string())
            }
        }
    }

    fn build(&self, url: &str, method: Method, headers: HeaderMap, body: RequestBody) -> RequestBuilder {
        let identity = self.identity.load();
        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(id) = identity.id() {
            builder = builder.header(identity.header_name(), id);
        }

        match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Raw {
                bytes,
                content_type,
            } => {
                let builder = builder.body(bytes);
                match content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                    Some(ct) => builder.header(CONTENT_TYPE, ct),
                    None => builder,
                }
            }
            RequestBody::Multipart(form) => builder.multipart(form),
        }
    }
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("origin", &self.origin)
            .field("base_path", &self.base_path)
            .finish()
    }
}

async fn execute(builder: RequestBuilder) -> Result<ApiResult, reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let data = match content_type.as_deref() {
        Some(ct) if ct.contains("application/json") => {
            Some(ResponseData::Json(response.json::<Value>().await?))
        }
        Some(ct) if ct.contains("text/") => Some(ResponseData::Text(response.text().await?)),
        Some(ct) if ct.contains("application/octet-stream") => {
            Some(ResponseData::Binary(response.bytes().await?))
        }
        _ => None,
    };

    Ok(ApiResult::from_parts(
        status.as_u16(),
        status.is_success(),
        content_type,
        data,
    ))
}

#[cfg(test)]
impl ApiResult {
    pub(crate) fn ok_json(value: Value) -> Self {
        Self::from_parts(
            200,
            true,
            Some("application/json".into()),
            Some(ResponseData::Json(value)),
        )
    }

    pub(crate) fn error_json(code: u16, value: Value) -> Self {
        Self::from_parts(
            code,
            false,
            Some("application/json".into()),
            Some(ResponseData::Json(value)),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;

    /// Serve `router` on an ephemeral local port, returning its origin
    pub async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use kikx_protocol::Identity;
    use serde_json::json;

    use super::testing::spawn_server;
    use super::*;

    fn echo_identity(headers: AxumHeaders) -> Json<Value> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "client": read("kikx-client-id"),
            "app": read("kikx-app-id"),
        }))
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/service/fs/whoami",
                get(|headers: AxumHeaders| async move { echo_identity(headers) }),
            )
            .route(
                "/service/fs/echo",
                post(|headers: AxumHeaders, body: String| async move {
                    let ct = headers
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    Json(json!({ "content_type": ct, "body": body }))
                }),
            )
            .route("/service/fs/text", get(|| async { "plain words" }))
            .route(
                "/service/fs/blob",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "application/octet-stream")],
                        vec![1u8, 2, 3],
                    )
                }),
            )
            .route(
                "/service/fs/image",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, 0x50]) }),
            )
            .route(
                "/service/fs/blob-missing",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        [(header::CONTENT_TYPE, "application/octet-stream")],
                        b"no such blob".to_vec(),
                    )
                }),
            )
            .route(
                "/service/fs/image-missing",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        [(header::CONTENT_TYPE, "image/png")],
                        Vec::<u8>::new(),
                    )
                }),
            )
            .route(
                "/service/fs/denied",
                get(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        Json(json!({ "detail": "not yours" })),
                    )
                }),
            )
            .route(
                "/service/fs/empty-error",
                get(|| async { (StatusCode::BAD_GATEWAY, String::new()) }),
            )
    }

    async fn fs_gateway(identity: Identity) -> (RequestGateway, SharedIdentity) {
        let origin = spawn_server(router()).await;
        let identity = SharedIdentity::new(identity);
        let root = RequestGateway::new(reqwest::Client::new(), &origin, identity.clone());
        (root.service("fs"), identity)
    }

    #[test]
    fn urls_are_namespace_relative() {
        let root = RequestGateway::new(
            reqwest::Client::new(),
            "http://desk.local/",
            SharedIdentity::new(Identity::unassigned_client()),
        );
        assert_eq!(root.url("/open-app"), "http://desk.local/open-app");
        assert_eq!(
            root.service("system").url("client/func"),
            "http://desk.local/service/system/client/func"
        );
    }

    #[tokio::test]
    async fn stamps_current_identity_and_follows_rotation() {
        let (fs, identity) = fs_gateway(Identity::client("first")).await;

        let result = fs.get("whoami").await;
        assert!(result.ok);
        assert_eq!(result.json(), Some(&json!({"client": "first", "app": null})));

        identity.adopt("second");
        let result = fs.get("whoami").await;
        assert_eq!(result.json(), Some(&json!({"client": "second", "app": null})));
    }

    #[tokio::test]
    async fn app_identity_uses_app_header() {
        let (fs, _identity) = fs_gateway(Identity::app("a-1")).await;
        let result = fs.get("whoami").await;
        assert_eq!(result.json(), Some(&json!({"client": null, "app": "a-1"})));
    }

    #[tokio::test]
    async fn json_body_is_serialized_and_labelled() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;
        let result = fs.post_json("echo", json!({"filename": "a.txt"})).await;

        let body = result.json().unwrap();
        assert_eq!(body["content_type"], json!("application/json"));
        assert_eq!(body["body"], json!(r#"{"filename":"a.txt"}"#));
    }

    #[tokio::test]
    async fn raw_body_passes_through_unchanged() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;
        let result = fs
            .request(
                "echo",
                Method::POST,
                RequestBody::Raw {
                    bytes: Bytes::from_static(b"not json"),
                    content_type: Some("text/plain".into()),
                },
            )
            .await;

        let body = result.json().unwrap();
        assert_eq!(body["content_type"], json!("text/plain"));
        assert_eq!(body["body"], json!("not json"));
    }

    #[tokio::test]
    async fn body_parsing_follows_content_type() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;

        let text = fs.get("text").await;
        assert_eq!(text.text(), Some("plain words"));

        let blob = fs.get("blob").await;
        assert_eq!(blob.bytes(), Some(&Bytes::from_static(&[1, 2, 3])));

        let image = fs.get("image").await;
        assert!(image.ok);
        assert_eq!(image.code, 200);
        assert_eq!(image.data, None);
        assert_eq!(image.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn unknown_content_type_error_keeps_status() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;
        let result = fs.get("image-missing").await;
        assert!(!result.ok);
        assert_eq!(result.code, 404);
        assert_eq!(result.data, None);
        assert_eq!(result.error_detail().as_deref(), Some("Error 404"));
    }

    #[tokio::test]
    async fn binary_error_body_is_kept() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;
        let result = fs.get("blob-missing").await;
        assert!(!result.ok);
        assert_eq!(result.code, 404);
        assert_eq!(result.data, None);
        assert_eq!(
            result.error,
            Some(ApiError::Binary(Bytes::from_static(b"no such blob")))
        );
        assert_eq!(result.error_detail().as_deref(), Some("no such blob"));
    }

    #[tokio::test]
    async fn error_body_populates_error_not_data() {
        let (fs, _identity) = fs_gateway(Identity::client("c")).await;

        let denied = fs.get("denied").await;
        assert!(!denied.ok);
        assert_eq!(denied.code, 403);
        assert_eq!(denied.data, None);
        assert_eq!(denied.error, Some(ApiError::Body(json!({"detail": "not yours"}))));
        assert_eq!(denied.error_detail().as_deref(), Some("not yours"));

        let empty = fs.get("empty-error").await;
        assert_eq!(empty.code, 502);
        assert_eq!(empty.error, Some(ApiError::Message("Error 502".into())));
    }

    #[tokio::test]
    async fn network_failure_becomes_500() {
        // Nothing listens on the discard port
        let root = RequestGateway::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            SharedIdentity::new(Identity::client("c")),
        );
        let result = root.get("anything").await;
        assert!(!result.ok);
        assert_eq!(result.code, 500);
        assert_eq!(result.data, None);
        assert!(result.error.is_some());
    }
}
