//! Typed wrappers over the host's service namespaces.

use bytes::Bytes;
use futures::future::BoxFuture;
use kikx_protocol::{FuncCall, FuncConfig, NotifyRequest};
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::{json, Value};
use urlencoding::encode;

use crate::gateway::{ApiResult, RequestBody, RequestGateway};

/// Function-call bridge (`app/func` or `client/func`).
///
/// The task layer only needs this one call, so it is a trait to let tests
/// drive it without a host.
pub trait FuncBridge: Send + Sync {
    fn call<'a>(&'a self, name: &'a str, config: FuncConfig) -> BoxFuture<'a, ApiResult>;
}

/// `/service/system`
#[derive(Debug, Clone)]
pub struct SystemService {
    gateway: RequestGateway,
}

impl SystemService {
    pub fn new(root: &RequestGateway) -> Self {
        Self {
            gateway: root.service("system"),
        }
    }

    pub async fn notify(&self, notification: &NotifyRequest) -> ApiResult {
        match serde_json::to_value(notification) {
            Ok(body) => self.gateway.post_json("notify", body).await,
            Err(e) => ApiResult::failure(e.to_string()),
        }
    }

    pub async fn send_signal(&self, signal: &str) -> ApiResult {
        self.gateway
            .get(&format!("signal?signal={}", encode(signal)))
            .await
    }

    pub async fn user_settings(&self, setting: Option<&str>) -> ApiResult {
        match setting {
            Some(setting) => {
                self.gateway
                    .get(&format!("user-settings?setting={}", encode(setting)))
                    .await
            }
            None => self.gateway.get("user-settings").await,
        }
    }

    pub async fn set_user_settings(&self, settings: Value) -> ApiResult {
        self.gateway
            .post_json("user-settings", json!({ "settings": settings }))
            .await
    }

    /// Call a host function; the endpoint follows the caller's identity kind
    pub async fn func(&self, name: &str, config: FuncConfig) -> ApiResult {
        let endpoint = self.gateway.identity().load().func_endpoint();
        let call = FuncCall {
            name: name.to_string(),
            config,
        };
        match serde_json::to_value(&call) {
            Ok(body) => self.gateway.post_json(endpoint, body).await,
            Err(e) => ApiResult::failure(e.to_string()),
        }
    }

    /// Ask the host to close the calling app
    pub async fn close_self(&self) -> ApiResult {
        self.gateway
            .request("close-app", Method::POST, RequestBody::Empty)
            .await
    }
}

impl FuncBridge for SystemService {
    fn call<'a>(&'a self, name: &'a str, config: FuncConfig) -> BoxFuture<'a, ApiResult> {
        Box::pin(self.func(name, config))
    }
}

/// `/service/fs`
#[derive(Debug, Clone)]
pub struct FileSystemService {
    gateway: RequestGateway,
}

impl FileSystemService {
    pub fn new(root: &RequestGateway) -> Self {
        Self {
            gateway: root.service("fs"),
        }
    }

    pub async fn list_files(&self, directory: &str) -> ApiResult {
        self.gateway
            .get(&format!("list?directory={}", encode(directory)))
            .await
    }

    pub async fn read_file(&self, filename: &str) -> ApiResult {
        self.gateway
            .get(&format!("read?filename={}", encode(filename)))
            .await
    }

    pub async fn write_file(&self, filename: &str, content: &str) -> ApiResult {
        self.gateway
            .post_json("write", json!({ "filename": filename, "content": content }))
            .await
    }

    pub async fn upload_file(&self, filename: &str, contents: Bytes) -> ApiResult {
        let part = Part::bytes(contents.to_vec()).file_name(filename.to_string());
        let form = Form::new().part("file", part);
        self.gateway
            .request("upload", Method::POST, RequestBody::Multipart(form))
            .await
    }

    pub async fn delete_file(&self, filename: &str) -> ApiResult {
        self.gateway
            .request(
                &format!("delete?filename={}", encode(filename)),
                Method::DELETE,
                RequestBody::Empty,
            )
            .await
    }

    pub async fn create_directory(&self, dirname: &str) -> ApiResult {
        self.gateway
            .post_json("create_directory", json!({ "dirname": dirname }))
            .await
    }

    pub async fn delete_directory(&self, dirname: &str) -> ApiResult {
        self.gateway
            .request(
                &format!("delete_directory?dirname={}", encode(dirname)),
                Method::DELETE,
                RequestBody::Empty,
            )
            .await
    }

    pub async fn copy(&self, source: &str, destination: &str) -> ApiResult {
        self.gateway
            .post_json(
                "copy",
                json!({ "source": source, "destination": destination }),
            )
            .await
    }

    pub async fn move_to(&self, source: &str, destination: &str) -> ApiResult {
        self.gateway
            .post_json(
                "move",
                json!({ "source": source, "destination": destination }),
            )
            .await
    }

    pub async fn serve(&self, filename: &str) -> ApiResult {
        self.gateway
            .get(&format!("serve?filename={}", encode(filename)))
            .await
    }
}

/// `/service/proxy`: outbound fetches relayed by the host
#[derive(Debug, Clone)]
pub struct ProxyService {
    gateway: RequestGateway,
}

impl ProxyService {
    pub fn new(root: &RequestGateway) -> Self {
        Self {
            gateway: root.service("proxy"),
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        headers: HeaderMap,
        body: RequestBody,
    ) -> ApiResult {
        self.gateway
            .request_with_headers(&format!("?url={}", encode(url)), method, headers, body)
            .await
    }

    pub async fn get(&self, url: &str) -> ApiResult {
        self.fetch(url, Method::GET, HeaderMap::new(), RequestBody::Empty)
            .await
    }

    pub async fn post(&self, url: &str, body: RequestBody) -> ApiResult {
        self.fetch(url, Method::POST, HeaderMap::new(), body).await
    }
}
