//! Wiring for one client: identity, gateways, session and task registry
//! built from a single `ClientConfig`.

use std::path::Path;
use std::sync::Arc;

use crate::apps::{AppHostManager, AppSurface};
use crate::config::{ClientConfig, ConfigError};
use crate::gateway::RequestGateway;
use crate::handler::HandlerRegistry;
use crate::identity::SharedIdentity;
use crate::services::{FileSystemService, ProxyService, SystemService};
use crate::session::Session;
use crate::task::Tasks;
use crate::transport::{Connector, WsConnector};

pub struct KikxContext {
    config: ClientConfig,
    identity: SharedIdentity,
    gateway: RequestGateway,
    system: SystemService,
    fs: FileSystemService,
    proxy: ProxyService,
    session: Session,
    tasks: Tasks,
}

impl KikxContext {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Load config (see `ClientConfig::load`) and build a context from it
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(Self::new(ClientConfig::load(path)?))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let identity = SharedIdentity::new(config.identity());
        let gateway = RequestGateway::new(reqwest::Client::new(), &config.server_url, identity.clone());
        let system = SystemService::new(&gateway);
        let fs = FileSystemService::new(&gateway);
        let proxy = ProxyService::new(&gateway);

        let session = Session::new(&config.server_url, identity.clone(), config.reconnect, connector);
        let registry = HandlerRegistry::new();
        registry.attach(&session);
        let tasks = Tasks::new(registry, Arc::new(system.clone()));

        Self {
            config,
            identity,
            gateway,
            system,
            fs,
            proxy,
            session,
            tasks,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &SharedIdentity {
        &self.identity
    }

    /// Gateway at the host root (`/open-app`, `/close-app`)
    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn system(&self) -> &SystemService {
        &self.system
    }

    pub fn fs(&self) -> &FileSystemService {
        &self.fs
    }

    pub fn proxy(&self) -> &ProxyService {
        &self.proxy
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    /// App host manager for a shell client, subscribed to this session
    pub fn app_host(&self, surface: Arc<dyn AppSurface>) -> Arc<AppHostManager> {
        let manager = Arc::new(AppHostManager::new(
            self.identity.clone(),
            Arc::new(self.gateway.clone()),
            surface,
        ));
        manager.attach(&self.session);
        manager
    }
}

impl std::fmt::Debug for KikxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KikxContext")
            .field("server_url", &self.config.server_url)
            .field("identity", &self.identity)
            .field("phase", &self.session.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use kikx_protocol::{HandlerStatus, Identity};
    use serde_json::{json, Value};

    use super::*;
    use crate::gateway::testing::spawn_server;
    use crate::transport::testing::MemoryConnector;

    async fn whoami(ctx: &KikxContext) -> Value {
        let result = ctx.gateway().service("fs").get("whoami").await;
        result.json().cloned().unwrap_or(Value::Null)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/service/fs/whoami",
                get(|headers: HeaderMap| async move {
                    let client = headers
                        .get("kikx-client-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Json(json!({ "client": client }))
                }),
            )
            .route(
                "/service/system/client/func",
                post(|Json(call): Json<Value>| async move {
                    match call["name"].as_str() {
                        Some("tasks.run_task") => Json(json!("task-9")),
                        _ => Json(Value::Null),
                    }
                }),
            )
    }

    #[test]
    fn identity_comes_from_config() {
        let config = ClientConfig {
            app_id: Some("a1".into()),
            ..ClientConfig::default()
        };
        let ctx = KikxContext::new(config);
        assert_eq!(*ctx.identity().load(), Identity::app("a1"));
        assert_eq!(ctx.session().socket_url(), "ws://127.0.0.1:8000/app/a1");
    }

    #[tokio::test]
    async fn rotated_identity_reaches_every_gateway() {
        let origin = spawn_server(router()).await;
        let (connector, mut peers) = MemoryConnector::new();
        let config = ClientConfig {
            server_url: origin,
            client_id: Some("stale".into()),
            ..ClientConfig::default()
        };
        let ctx = KikxContext::with_connector(config, connector);

        let before = whoami(&ctx).await;
        assert_eq!(before, json!({"client": "stale"}));

        ctx.session().connect();
        let peer = peers.recv().await.unwrap();
        peer.push_json(json!({"event": "connected", "payload": {"client_id": "fresh"}}));
        settle().await;

        let after = whoami(&ctx).await;
        assert_eq!(after, json!({"client": "fresh"}));
        assert!(ctx.session().socket_url().ends_with("/client?client_id=fresh"));
    }

    #[tokio::test]
    async fn task_output_flows_from_session_to_handle() {
        let origin = spawn_server(router()).await;
        let (connector, mut peers) = MemoryConnector::new();
        let config = ClientConfig {
            server_url: origin,
            client_id: Some("c1".into()),
            ..ClientConfig::default()
        };
        let ctx = KikxContext::with_connector(config, connector);
        ctx.session().connect();
        let peer = peers.recv().await.unwrap();
        settle().await;

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let task = ctx.tasks().create("tail");
        task.on(move |data| {
            if data.status == HandlerStatus::Output {
                sink.lock().unwrap().push(data.output.clone());
            }
        });
        task.run("-f log").await.unwrap();

        peer.push_json(json!({
            "event": "handler-data",
            "payload": {"id": task.handler().id(), "data": {"status": "output", "output": "line 1"}}
        }));
        settle().await;

        assert_eq!(*lines.lock().unwrap(), vec![json!("line 1")]);
    }
}
