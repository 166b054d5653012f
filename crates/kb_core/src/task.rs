//! Client-side registry of server background jobs.
//!
//! A task is registered before its start call goes out, so a stop can be
//! issued against an id the server has not acknowledged yet. Status only
//! moves through [`TaskTracker::record`] (poll responses) and
//! [`TaskTracker::acknowledge_stop`]; once a terminal status is recorded it
//! never changes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use kb_logging::{kb_debug, kb_info, kb_warn};
use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh client-side id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Parse,
    Vectorize,
    BatchParse,
    BatchVectorize,
    ChatAsk,
    OutlineGenerate,
    ContentGenerate,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Parse => "parse",
            TaskKind::Vectorize => "vectorize",
            TaskKind::BatchParse => "batch-parse",
            TaskKind::BatchVectorize => "batch-vectorize",
            TaskKind::ChatAsk => "chat-ask",
            TaskKind::OutlineGenerate => "outline-generate",
            TaskKind::ContentGenerate => "content-generate",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Stopped
        )
    }

    /// Maps the status vocabulary used by the server's status endpoints.
    ///
    /// Returns `None` for strings the client does not recognise; callers
    /// decide whether to keep polling.
    pub fn from_server(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "not_started" => Some(TaskStatus::Pending),
            "running" | "parsing" | "chunking" | "vectorizing" | "processing" => {
                Some(TaskStatus::Running)
            }
            "success" | "completed" | "done" => Some(TaskStatus::Success),
            "error" | "failed" => Some(TaskStatus::Error),
            "stopped" | "cancelled" | "canceled" => Some(TaskStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Identifies one server-side job for as long as the tracker holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Logical target, e.g. a document id or a conversation slot.
    pub target: String,
}

/// Outcome of asking the tracker whether a cancellation should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// Task is still live; send the cancellation request.
    Send,
    /// Task already reached this terminal status; nothing to cancel.
    AlreadyTerminal(TaskStatus),
}

#[derive(Debug, Clone)]
struct TaskEntry {
    handle: TaskHandle,
    status: TaskStatus,
    server_id: Option<String>,
    stop_requested: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    tasks: BTreeMap<TaskId, TaskEntry>,
    active: HashMap<(TaskKind, String), TaskId>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task under a freshly generated id.
    pub fn start(
        &mut self,
        kind: TaskKind,
        target: impl Into<String>,
    ) -> Result<TaskHandle, CoreError> {
        self.start_with_id(kind, target, TaskId::generate())
    }

    /// Registers a task under a caller-chosen id.
    ///
    /// At most one non-terminal task may exist per `(kind, target)`.
    pub fn start_with_id(
        &mut self,
        kind: TaskKind,
        target: impl Into<String>,
        id: TaskId,
    ) -> Result<TaskHandle, CoreError> {
        let target = target.into();
        let key = (kind, target.clone());
        if self.active.contains_key(&key) || self.tasks.contains_key(&id) {
            kb_warn!("Rejected duplicate {} task for target {}", kind, target);
            return Err(CoreError::DuplicateTask { kind, target });
        }

        let handle = TaskHandle {
            id: id.clone(),
            kind,
            target,
        };
        self.active.insert(key, id.clone());
        self.tasks.insert(
            id,
            TaskEntry {
                handle: handle.clone(),
                status: TaskStatus::Pending,
                server_id: None,
                stop_requested: false,
            },
        );
        kb_info!(
            "Task {} started kind={} target={}",
            handle.id,
            handle.kind,
            handle.target
        );
        Ok(handle)
    }

    /// Current recorded status of a registered task.
    pub fn poll(&self, id: &TaskId) -> Result<TaskStatus, CoreError> {
        self.entry(id).map(|entry| entry.status)
    }

    /// Records a status observed from the server and returns the status now
    /// in effect. A terminal status already recorded is never replaced.
    pub fn record(&mut self, id: &TaskId, observed: TaskStatus) -> Result<TaskStatus, CoreError> {
        let entry = self.entry_mut(id)?;
        if entry.status.is_terminal() {
            if entry.status != observed {
                kb_debug!(
                    "Task {} ignoring {} after terminal {}",
                    id,
                    observed,
                    entry.status
                );
            }
            return Ok(entry.status);
        }
        kb_debug!("Task {} observed {}", id, observed);
        entry.status = observed;
        if observed.is_terminal() {
            let key = (entry.handle.kind, entry.handle.target.clone());
            self.release(key, id);
        }
        Ok(observed)
    }

    /// Remembers the id the server issued for this job, if it differs.
    pub fn attach_server_id(
        &mut self,
        id: &TaskId,
        server_id: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.entry_mut(id)?.server_id = Some(server_id.into());
        Ok(())
    }

    pub fn server_id(&self, id: &TaskId) -> Option<&str> {
        self.tasks.get(id).and_then(|entry| entry.server_id.as_deref())
    }

    /// Marks a stop as requested and tells the caller whether a cancellation
    /// request is still worth sending.
    pub fn request_stop(&mut self, id: &TaskId) -> Result<StopDecision, CoreError> {
        let entry = self.entry_mut(id)?;
        if entry.status.is_terminal() {
            return Ok(StopDecision::AlreadyTerminal(entry.status));
        }
        entry.stop_requested = true;
        kb_info!("Task {} stop requested", id);
        Ok(StopDecision::Send)
    }

    pub fn stop_requested(&self, id: &TaskId) -> bool {
        self.tasks
            .get(id)
            .map(|entry| entry.stop_requested)
            .unwrap_or(false)
    }

    /// Applies the server's acknowledgment of a stop. First terminal status
    /// wins, so a task that already finished keeps its result.
    pub fn acknowledge_stop(&mut self, id: &TaskId) -> Result<TaskStatus, CoreError> {
        self.record(id, TaskStatus::Stopped)
    }

    /// Removes a terminal task. Absent ids are a no-op; live tasks are kept.
    pub fn reap(&mut self, id: &TaskId) -> bool {
        match self.tasks.get(id) {
            None => false,
            Some(entry) if !entry.status.is_terminal() => {
                kb_warn!("Refusing to reap live task {} ({})", id, entry.status);
                false
            }
            Some(_) => {
                self.tasks.remove(id);
                kb_debug!("Task {} reaped", id);
                true
            }
        }
    }

    pub fn handle(&self, id: &TaskId) -> Option<&TaskHandle> {
        self.tasks.get(id).map(|entry| &entry.handle)
    }

    /// The live task for a logical target, if any.
    pub fn active_for(&self, kind: TaskKind, target: &str) -> Option<&TaskHandle> {
        self.active
            .get(&(kind, target.to_string()))
            .and_then(|id| self.handle(id))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Registered tasks, terminal ones included until they are reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn release(&mut self, key: (TaskKind, String), id: &TaskId) {
        if self.active.get(&key) == Some(id) {
            self.active.remove(&key);
        }
    }

    fn entry(&self, id: &TaskId) -> Result<&TaskEntry, CoreError> {
        self.tasks
            .get(id)
            .ok_or_else(|| CoreError::UnknownTask(id.clone()))
    }

    fn entry_mut(&mut self, id: &TaskId) -> Result<&mut TaskEntry, CoreError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownTask(id.clone()))
    }
}
