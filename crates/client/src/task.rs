//! Client-side proxies for host-spawned processes.
//!
//! A `TaskHandle` starts a process through the function-call bridge and
//! receives its status stream through a registered `Handler`. At most one
//! invocation per handle is live at a time.
//!
//! State transitions:
//! `Idle -> Starting -> Running -> Ended -> Starting ...`, with a rejected
//! start returning `Starting -> Idle`. Only an `ended` push moves a handle to
//! `Ended`; the host always follows `error` with `ended`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kikx_protocol::{FuncConfig, HandlerData, HandlerStatus, TaskOutput};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::handler::{Handler, HandlerRegistry};
use crate::services::FuncBridge;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task is not running")]
    NotRunning,

    #[error("No input given")]
    EmptyInput,

    #[error("Task failed to start: {0}")]
    Start(String),

    #[error("{call} failed: {detail}")]
    Backend { call: &'static str, detail: String },

    #[error("Task wrote to stderr: {0}")]
    Stderr(String),

    #[error("Unexpected response from {call}")]
    InvalidResponse { call: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    /// Start requested, host has not answered yet
    Starting,
    Running { task_id: String },
    /// `task_id` is `None` when the process ended before the start call returned
    Ended { task_id: Option<String> },
}

impl TaskState {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running { .. })
    }
}

/// Outcome of `TaskHandle::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started { task_id: String },
    /// An invocation is already live; nothing was sent
    AlreadyRunning,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one named host task. Dropping it unregisters its handler.
pub struct TaskHandle {
    name: String,
    handler: Arc<Handler>,
    registry: HandlerRegistry,
    bridge: Arc<dyn FuncBridge>,
    state: Arc<Mutex<TaskState>>,
    detached: bool,
}

impl TaskHandle {
    pub fn new(name: impl Into<String>, registry: HandlerRegistry, bridge: Arc<dyn FuncBridge>) -> Self {
        let handler = registry.create();
        let state = Arc::new(Mutex::new(TaskState::Idle));

        let tracked = state.clone();
        handler.on_data(move |data| {
            if data.status != HandlerStatus::Ended {
                return;
            }
            let mut state = lock(&tracked);
            let task_id = match &*state {
                TaskState::Running { task_id } => Some(task_id.clone()),
                TaskState::Ended { task_id } => task_id.clone(),
                _ => None,
            };
            *state = TaskState::Ended { task_id };
        });

        Self {
            name: name.into(),
            handler,
            registry,
            bridge,
            state,
            detached: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub fn state(&self) -> TaskState {
        lock(&self.state).clone()
    }

    /// Subscribe to every status push for this task
    pub fn on<F>(&self, callback: F)
    where
        F: Fn(&HandlerData) + Send + Sync + 'static,
    {
        self.handler.on_data(callback);
    }

    /// Start the task unless an invocation is already live.
    ///
    /// A host-side rejection is returned as `TaskError::Start` and leaves the
    /// handle idle; everything after a successful start arrives through the
    /// handler stream.
    pub async fn run(&self, args: &str) -> Result<RunOutcome, TaskError> {
        {
            let mut state = lock(&self.state);
            if state.is_active() {
                debug!(
                    component = "task",
                    event = "task.run.skipped",
                    task = %self.name,
                    "Task already running"
                );
                return Ok(RunOutcome::AlreadyRunning);
            }
            *state = TaskState::Starting;
        }

        match self.start(args).await {
            Ok(task_id) => {
                let mut state = lock(&self.state);
                let next = match &*state {
                    TaskState::Ended { .. } => TaskState::Ended {
                        task_id: Some(task_id.clone()),
                    },
                    _ => TaskState::Running {
                        task_id: task_id.clone(),
                    },
                };
                *state = next;
                Ok(RunOutcome::Started { task_id })
            }
            Err(e) => {
                let mut state = lock(&self.state);
                if *state == TaskState::Starting {
                    *state = TaskState::Idle;
                }
                Err(e)
            }
        }
    }

    async fn start(&self, args: &str) -> Result<String, TaskError> {
        let command = format!("{} {}", self.name, args).trim().to_string();
        let config = FuncConfig::args([command.clone()]).option("handler_id", self.handler.id());
        let result = self.bridge.call("tasks.run_task", config).await;

        if let Some(detail) = result.error_detail() {
            warn!(
                component = "task",
                event = "task.run.rejected",
                task = %self.name,
                code = result.code,
                error = %detail,
                "Host rejected task start"
            );
            return Err(TaskError::Start(detail));
        }

        let task_id = result
            .text()
            .map(str::to_string)
            .ok_or(TaskError::InvalidResponse {
                call: "tasks.run_task",
            })?;
        info!(
            component = "task",
            event = "task.run.started",
            command = %command,
            task_id = %task_id,
            handler_id = %self.handler.id(),
            "Task started"
        );
        Ok(task_id)
    }

    fn running_task_id(&self) -> Result<String, TaskError> {
        match &*lock(&self.state) {
            TaskState::Running { task_id } => Ok(task_id.clone()),
            _ => Err(TaskError::NotRunning),
        }
    }

    /// Write `input` to the process. Forwarding is best-effort: a host error
    /// is logged, not returned.
    pub async fn send(&self, input: &str) -> Result<(), TaskError> {
        if input.is_empty() {
            return Err(TaskError::EmptyInput);
        }
        let task_id = self.running_task_id()?;

        let result = self
            .bridge
            .call("tasks.send_input", FuncConfig::args([task_id.as_str(), input]))
            .await;
        if let Some(detail) = result.error_detail() {
            warn!(
                component = "task",
                event = "task.input.failed",
                task_id = %task_id,
                error = %detail,
                "Failed to forward task input"
            );
        }
        Ok(())
    }

    /// Ask the host to terminate the running process
    pub async fn kill(&self) -> Result<(), TaskError> {
        let task_id = self.running_task_id()?;

        let result = self
            .bridge
            .call("tasks.kill", FuncConfig::args([task_id.as_str()]))
            .await;
        if let Some(detail) = result.error_detail() {
            return Err(TaskError::Backend {
                call: "tasks.kill",
                detail,
            });
        }
        info!(
            component = "task",
            event = "task.kill.requested",
            task_id = %task_id,
            "Task kill requested"
        );
        Ok(())
    }

    /// Leave the handler registered after this handle is dropped
    fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.registry.remove(self.handler.id());
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("handler_id", &self.handler.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Task entry points sharing one registry and bridge (cheap to Clone).
#[derive(Clone)]
pub struct Tasks {
    registry: HandlerRegistry,
    bridge: Arc<dyn FuncBridge>,
}

impl Tasks {
    pub fn new(registry: HandlerRegistry, bridge: Arc<dyn FuncBridge>) -> Self {
        Self { registry, bridge }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn create(&self, name: impl Into<String>) -> TaskHandle {
        TaskHandle::new(name, self.registry.clone(), self.bridge.clone())
    }

    /// Fire-and-forget: start `name`, deliver its pushes to `callback` and
    /// unregister the handler once the host reports `ended`.
    pub async fn run<F>(&self, name: &str, args: &str, callback: F) -> Result<String, TaskError>
    where
        F: Fn(&HandlerData) + Send + Sync + 'static,
    {
        let task = self.create(name);
        task.on(callback);

        let registry = self.registry.clone();
        let handler_id = task.handler().id().to_string();
        task.on(move |data| {
            if data.status == HandlerStatus::Ended {
                registry.remove(&handler_id);
            }
        });

        match task.run(args).await? {
            RunOutcome::Started { task_id } => {
                task.detach();
                Ok(task_id)
            }
            // A fresh handle is never already running
            RunOutcome::AlreadyRunning => Err(TaskError::InvalidResponse {
                call: "tasks.run_task",
            }),
        }
    }

    /// Run a shell command to completion and return its stdout.
    pub async fn sh(&self, cmd: &str, input: &[String]) -> Result<String, TaskError> {
        let config = FuncConfig::args([cmd]).option("task_input", input.to_vec());
        let result = self.bridge.call("tasks.sh", config).await;

        if let Some(detail) = result.error_detail() {
            return Err(TaskError::Backend {
                call: "tasks.sh",
                detail,
            });
        }
        let output: TaskOutput = result
            .parse()
            .ok_or(TaskError::InvalidResponse { call: "tasks.sh" })?;
        if let Some(stderr) = output.stderr.filter(|stderr| !stderr.is_empty()) {
            return Err(TaskError::Stderr(stderr));
        }
        Ok(output.stdout.unwrap_or_default())
    }
}

impl std::fmt::Debug for Tasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasks")
            .field("handlers", &self.registry.len())
            .finish()
    }
}
