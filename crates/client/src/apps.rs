//! Open-app bookkeeping for a shell client.
//!
//! Keeps the set of embedded apps, which one is in the foreground, and the
//! host's instance bookkeeping consistent. Local entries are only created
//! after the host hands out an instance and only removed after the host
//! confirms teardown. Presentation is delegated to an `AppSurface`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use kikx_protocol::{
    AppClose, AppNotify, CloseAppRequest, IframeSpec, OpenAppRequest, OpenAppResponse,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{ApiError, ApiResult, RequestGateway};
use crate::identity::SharedIdentity;
use crate::session::Session;

#[derive(Debug, Error)]
pub enum AppHostError {
    #[error("Failed to open {name}: {detail}")]
    Rejected { name: String, detail: String },

    #[error("Failed to close {name}: {detail}")]
    CloseFailed { name: String, detail: String },

    #[error("{name} is already being opened or closed")]
    Busy { name: String },

    #[error("Unexpected open-app response for {name}")]
    InvalidResponse { name: String },
}

/// One embedded app. `instance_id` is fixed for the entry's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApp {
    pub name: String,
    pub title: String,
    pub icon: String,
    pub instance_id: String,
    pub url: String,
    pub iframe: IframeSpec,
}

/// Presentation layer for embedded apps
pub trait AppSurface: Send + Sync {
    /// Create the frame and tab for a newly opened app
    fn mount(&self, app: &OpenApp);

    fn unmount(&self, name: &str);

    /// Bring `app` to the foreground; `None` shows the launcher
    fn show(&self, foreground: Option<&OpenApp>);

    /// Blocking user-facing error, used when the host refuses to open an app
    fn alert(&self, title: &str, text: Option<&str>);

    fn notify(&self, notification: &AppNotify);
}

/// Host-side app instance lifecycle
pub trait AppLifecycle: Send + Sync {
    fn open_app(&self, request: OpenAppRequest) -> BoxFuture<'_, ApiResult>;
    fn close_app(&self, request: CloseAppRequest) -> BoxFuture<'_, ApiResult>;
}

async fn post<T: Serialize>(gateway: &RequestGateway, endpoint: &str, body: &T) -> ApiResult {
    match serde_json::to_value(body) {
        Ok(body) => gateway.post_json(endpoint, body).await,
        Err(e) => ApiResult::failure(e.to_string()),
    }
}

impl AppLifecycle for RequestGateway {
    fn open_app(&self, request: OpenAppRequest) -> BoxFuture<'_, ApiResult> {
        Box::pin(async move { post(self, "open-app", &request).await })
    }

    fn close_app(&self, request: CloseAppRequest) -> BoxFuture<'_, ApiResult> {
        Box::pin(async move { post(self, "close-app", &request).await })
    }
}

enum Slot {
    /// Waiting for the host to hand out an instance; not yet visible
    Opening,
    Open(OpenApp),
    /// Teardown requested; still listed until the host confirms
    Closing(OpenApp),
}

impl Slot {
    fn app(&self) -> Option<&OpenApp> {
        match self {
            Slot::Opening => None,
            Slot::Open(app) | Slot::Closing(app) => Some(app),
        }
    }
}

#[derive(Default)]
struct AppsState {
    slots: HashMap<String, Slot>,
    /// Tab order of mounted apps
    order: Vec<String>,
    current: Option<String>,
}

pub struct AppHostManager {
    identity: SharedIdentity,
    lifecycle: Arc<dyn AppLifecycle>,
    surface: Arc<dyn AppSurface>,
    state: Mutex<AppsState>,
}

impl AppHostManager {
    pub fn new(
        identity: SharedIdentity,
        lifecycle: Arc<dyn AppLifecycle>,
        surface: Arc<dyn AppSurface>,
    ) -> Self {
        Self {
            identity,
            lifecycle,
            surface,
            state: Mutex::new(AppsState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AppsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Foreground app name, `None` when the launcher is shown
    pub fn current_app(&self) -> Option<String> {
        self.state().current.clone()
    }

    /// Mounted app names in tab order
    pub fn open_apps(&self) -> Vec<String> {
        self.state().order.clone()
    }

    pub fn get(&self, name: &str) -> Option<OpenApp> {
        self.state().slots.get(name).and_then(Slot::app).cloned()
    }

    /// Open `name`, or just foreground it if it is already open.
    ///
    /// A host rejection is alerted through the surface and leaves no local
    /// entry behind.
    pub async fn open(&self, name: &str, icon: &str, title: &str) -> Result<(), AppHostError> {
        {
            let mut state = self.state();
            let already_open = state
                .slots
                .get(name)
                .map(|slot| matches!(slot, Slot::Open(_)));
            match already_open {
                Some(true) => {
                    drop(state);
                    self.switch_app(Some(name));
                    return Ok(());
                }
                Some(false) => {
                    return Err(AppHostError::Busy {
                        name: name.to_string(),
                    });
                }
                None => {
                    state.slots.insert(name.to_string(), Slot::Opening);
                }
            }
        }

        let request = OpenAppRequest {
            client_id: self.identity.client_id(),
            name: name.to_string(),
        };
        let result = self.lifecycle.open_app(request).await;

        if let Some(detail) = result.error_detail() {
            self.state().slots.remove(name);
            warn!(
                component = "apps",
                event = "apps.open.rejected",
                app = %name,
                code = result.code,
                error = %detail,
                "Host refused to open app"
            );
            self.surface.alert(&detail, rejection_reason(&result));
            return Err(AppHostError::Rejected {
                name: name.to_string(),
                detail,
            });
        }

        let Some(response) = result.parse::<OpenAppResponse>() else {
            self.state().slots.remove(name);
            self.surface.alert(&format!("Failed to open {name}"), None);
            return Err(AppHostError::InvalidResponse {
                name: name.to_string(),
            });
        };

        let app = OpenApp {
            name: name.to_string(),
            title: title.to_string(),
            icon: icon.to_string(),
            instance_id: response.id,
            url: response.url,
            iframe: response.iframe,
        };
        {
            let mut state = self.state();
            state
                .slots
                .insert(name.to_string(), Slot::Open(app.clone()));
            state.order.push(name.to_string());
        }
        info!(
            component = "apps",
            event = "apps.open.completed",
            app = %name,
            instance_id = %app.instance_id,
            "App opened"
        );

        self.surface.mount(&app);
        self.switch_app(Some(name));
        Ok(())
    }

    /// Foreground `name` (or the launcher for `None`). Purely local.
    pub fn switch_app(&self, name: Option<&str>) {
        let foreground = {
            let mut state = self.state();
            let foreground = name
                .and_then(|name| state.slots.get(name))
                .and_then(Slot::app)
                .cloned();
            state.current = foreground.as_ref().map(|app| app.name.clone());
            foreground
        };
        self.surface.show(foreground.as_ref());
    }

    /// Tear down `name`'s instance on the host, then locally.
    ///
    /// Does nothing when the app is not open. If the host call fails the app
    /// stays open.
    pub async fn close(&self, name: &str) -> Result<(), AppHostError> {
        let app = {
            let mut state = self.state();
            let app = match state.slots.get(name) {
                None => return Ok(()),
                Some(Slot::Open(app)) => app.clone(),
                Some(Slot::Opening) | Some(Slot::Closing(_)) => {
                    return Err(AppHostError::Busy {
                        name: name.to_string(),
                    });
                }
            };
            state
                .slots
                .insert(name.to_string(), Slot::Closing(app.clone()));
            app
        };

        let request = CloseAppRequest {
            app_id: app.instance_id.clone(),
            client_id: self.identity.client_id(),
        };
        let result = self.lifecycle.close_app(request).await;

        if let Some(detail) = result.error_detail() {
            self.state().slots.insert(name.to_string(), Slot::Open(app));
            warn!(
                component = "apps",
                event = "apps.close.failed",
                app = %name,
                code = result.code,
                error = %detail,
                "Host refused to close app"
            );
            return Err(AppHostError::CloseFailed {
                name: name.to_string(),
                detail,
            });
        }

        let was_current = {
            let mut state = self.state();
            state.slots.remove(name);
            state.order.retain(|open| open != name);
            state.current.as_deref() == Some(name)
        };
        info!(
            component = "apps",
            event = "apps.close.completed",
            app = %name,
            instance_id = %app.instance_id,
            "App closed"
        );

        self.surface.unmount(name);
        if was_current {
            self.switch_app(None);
        }
        Ok(())
    }

    /// Host asked for an instance to close. Ignored unless the instance id
    /// is the one bound to that name.
    pub async fn handle_remote_close(&self, event: &AppClose) -> Result<bool, AppHostError> {
        let matches = matches!(
            self.state().slots.get(&event.name),
            Some(Slot::Open(app)) if app.instance_id == event.id
        );
        if !matches {
            debug!(
                component = "apps",
                event = "apps.remote_close.ignored",
                app = %event.name,
                instance_id = %event.id,
                "No open instance with that id"
            );
            return Ok(false);
        }
        self.close(&event.name).await?;
        Ok(true)
    }

    /// Forward a host notification unless it comes from the foreground app
    /// and does not ask to be shown anyway.
    pub fn handle_notify(&self, notification: &AppNotify) -> bool {
        let suppressed = !notification.display_even_active
            && self.state().current.as_deref() == Some(notification.name.as_str());
        if suppressed {
            return false;
        }
        self.surface.notify(notification);
        true
    }

    /// Subscribe to the session's `app:close` and `app:notify` events
    pub fn attach(self: &Arc<Self>, session: &Session) {
        let manager = self.clone();
        session.on("app:close", move |payload| {
            let event: AppClose = match serde_json::from_value(payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        component = "apps",
                        event = "apps.remote_close.invalid",
                        error = %e,
                        "Malformed app:close payload"
                    );
                    return;
                }
            };
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.handle_remote_close(&event).await {
                    warn!(
                        component = "apps",
                        event = "apps.remote_close.failed",
                        app = %event.name,
                        error = %e,
                        "Remote close failed"
                    );
                }
            });
        });

        let manager = self.clone();
        session.on("app:notify", move |payload| {
            match serde_json::from_value::<AppNotify>(payload.clone()) {
                Ok(notification) => {
                    manager.handle_notify(&notification);
                }
                Err(e) => warn!(
                    component = "apps",
                    event = "apps.notify.invalid",
                    error = %e,
                    "Malformed app:notify payload"
                ),
            }
        });
    }
}

impl std::fmt::Debug for AppHostManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("AppHostManager")
            .field("open", &state.order)
            .field("current", &state.current)
            .finish()
    }
}

fn rejection_reason(result: &ApiResult) -> Option<&str> {
    match &result.error {
        Some(ApiError::Body(body)) => body.get("reason").and_then(Value::as_str),
        _ => None,
    }
}
