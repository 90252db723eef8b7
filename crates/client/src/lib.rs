//! Kikx client
//!
//! Client-side plumbing for the Kikx web desktop: a reconnecting session to
//! the host, an identity-stamped HTTP gateway, a handler registry that
//! demultiplexes task output pushed over the session, task handles, and the
//! open-app bookkeeping used by the shell.

pub mod apps;
pub mod config;
pub mod context;
pub mod events;
pub mod gateway;
pub mod handler;
pub mod identity;
pub mod logging;
pub mod services;
pub mod session;
pub mod task;
pub mod transport;

pub use apps::{AppHostError, AppHostManager, AppLifecycle, AppSurface, OpenApp};
pub use config::{ClientConfig, ConfigError, ReconnectConfig};
pub use context::KikxContext;
pub use events::EventBus;
pub use gateway::{ApiError, ApiResult, RequestBody, RequestGateway, ResponseData};
pub use handler::{Handler, HandlerRegistry};
pub use identity::SharedIdentity;
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
pub use services::{FileSystemService, FuncBridge, ProxyService, SystemService};
pub use session::{Phase, Session, SessionError};
pub use task::{RunOutcome, TaskError, TaskHandle, TaskState, Tasks};
pub use transport::{Connector, Transport, TransportError, WsConnector};
