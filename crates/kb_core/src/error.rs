use thiserror::Error;

use crate::{TaskKind, TaskId};

/// Rejections raised by the client-side model. Every variant leaves the
/// state it was raised against unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("a {kind} task is already active for {target}")]
    DuplicateTask { kind: TaskKind, target: String },
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[error("outline is locked")]
    OutlineLocked,
    #[error("duplicate outline node id {0}")]
    DuplicateNodeId(String),
    #[error("paragraph id {0} already exists")]
    DuplicateParagraphId(String),
    #[error("version index {index} out of range (history has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("document {document_id} is not ready: {required}")]
    StageNotReady {
        document_id: String,
        required: &'static str,
    },
}

impl CoreError {
    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }
}
