use std::fmt;
use std::time::Duration;

use kb_core::{CoreError, TaskId, TaskKind};

use crate::PersistError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Decode,
    InvalidBody,
    TooLarge { max_bytes: u64, actual: Option<u64> },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Decode => write!(f, "malformed response"),
            FailureKind::InvalidBody => write!(f, "request body could not be encoded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
        }
    }
}

/// Network or HTTP failure at the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("task {task_id} still running after {elapsed:?}")]
    Timeout { task_id: TaskId, elapsed: Duration },
    #[error("task {task_id} was stopped")]
    Stopped { task_id: TaskId },
    #[error("task {task_id} was cancelled by the caller")]
    Cancelled { task_id: TaskId },
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },
    #[error("{kind} tasks have no status endpoint to poll")]
    NotPollable { kind: TaskKind },
    #[error(transparent)]
    Persist(#[from] PersistError),
}
