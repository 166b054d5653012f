//! Question answering over a folder's documents.
//!
//! An ask is registered in the task registry under the conversation it
//! belongs to before the request goes out, and the client-chosen task id
//! travels with the request, so a stop can race an ask the server has not
//! acknowledged yet. Whichever terminal status is recorded first decides
//! the result: an acknowledged stop discards a late answer, and an answer
//! that arrived first survives a late stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kb_core::{Msg, Source, TaskHandle, TaskId, TaskKind, TaskStatus};
use kb_logging::{kb_info, kb_warn};
use tokio::task::JoinHandle;

use crate::tracker::{stop_with, SharedTracker, StopSignals};
use crate::wire::{AskBody, AskResponse};
use crate::{ClientError, FailureKind, KnowledgeApi, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub question: String,
    pub folder_id: Option<String>,
    /// Absent for the first question of a new conversation.
    pub conversation_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            folder_id: None,
            conversation_id: None,
        }
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Registry key: one in-flight ask per conversation.
    fn target(&self) -> String {
        match &self.conversation_id {
            Some(id) => id.clone(),
            None => format!("new:{}", self.question),
        }
    }
}

/// A complete answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatAnswer {
    pub task_id: TaskId,
    pub conversation_id: Option<String>,
    pub folder_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

impl ChatAnswer {
    pub fn into_msg(self) -> Msg {
        Msg::AnswerReceived {
            conversation_id: self.conversation_id,
            folder_id: self.folder_id,
            question: self.question,
            answer: self.answer,
            sources: self.sources,
        }
    }
}

#[derive(Clone)]
pub struct ChatSession {
    api: Arc<dyn KnowledgeApi>,
    tracker: SharedTracker,
    signals: StopSignals,
}

type AskOutput = (Option<Result<AskResponse, TransportError>>, TaskStatus);

impl ChatSession {
    /// `signals` must be shared with every other path that can stop the
    /// same tasks, so an acknowledged stop reaches the waiting ask.
    pub fn new(api: Arc<dyn KnowledgeApi>, tracker: SharedTracker, signals: StopSignals) -> Self {
        Self {
            api,
            tracker,
            signals,
        }
    }

    /// Registers the ask and sends it in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `DuplicateTask` while another ask on the same conversation is live.
    pub fn ask(&self, request: AskRequest) -> Result<PendingAnswer, ClientError> {
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::ChatAsk, request.target())?;
        let body = AskBody {
            question: request.question.clone(),
            folder_id: request.folder_id.clone(),
            conversation_id: request.conversation_id.clone(),
            task_id: Some(handle.id.to_string()),
        };
        let api = Arc::clone(&self.api);
        let tracker = Arc::clone(&self.tracker);
        let signals = self.signals.clone();
        let stopped = signals.register(&handle.id);
        let detached = Arc::new(AtomicBool::new(false));
        let guard = ReapOnDrop {
            tracker: Arc::clone(&self.tracker),
            task_id: handle.id.clone(),
            detached: Arc::clone(&detached),
        };
        let task_id = handle.id.clone();
        let join = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = stopped.cancelled() => None,
                result = api.ask(&body) => Some(result),
            };
            signals.forget(&task_id);
            let observed = match &result {
                None => TaskStatus::Stopped,
                Some(Ok(response)) if response.stopped => TaskStatus::Stopped,
                Some(Ok(_)) => TaskStatus::Success,
                Some(Err(_)) => TaskStatus::Error,
            };
            let mut tracker = tracker.lock();
            let status = tracker.record(&task_id, observed).unwrap_or(observed);
            if detached.load(Ordering::SeqCst) {
                tracker.reap(&task_id);
            }
            (result, status)
        });
        Ok(PendingAnswer {
            handle,
            request,
            join,
            tracker: Arc::clone(&self.tracker),
            _reaper: guard,
        })
    }

    pub async fn stop(&self, task_id: &TaskId) -> Result<TaskStatus, ClientError> {
        let api = Arc::clone(&self.api);
        let status = stop_with(&self.tracker, task_id, |wire_id| async move {
            api.stop(&wire_id).await
        })
        .await?;
        if status == TaskStatus::Stopped {
            self.signals.fire(task_id);
        }
        Ok(status)
    }
}

/// Reaps an abandoned ask: at once if it already ended, otherwise when
/// the background request records its status.
struct ReapOnDrop {
    tracker: SharedTracker,
    task_id: TaskId,
    detached: Arc<AtomicBool>,
}

impl Drop for ReapOnDrop {
    fn drop(&mut self) {
        let mut tracker = self.tracker.lock();
        self.detached.store(true, Ordering::SeqCst);
        if matches!(tracker.poll(&self.task_id), Ok(status) if status.is_terminal()) {
            tracker.reap(&self.task_id);
        }
    }
}

/// An ask in flight. Dropping it abandons the answer; the task is reaped
/// once it ends.
pub struct PendingAnswer {
    handle: TaskHandle,
    request: AskRequest,
    join: JoinHandle<AskOutput>,
    tracker: SharedTracker,
    _reaper: ReapOnDrop,
}

impl PendingAnswer {
    pub fn task_id(&self) -> &TaskId {
        &self.handle.id
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// True once the response (or failure, or acknowledged stop) has been
    /// recorded.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Resolves to the full answer, or `Stopped` as soon as a stop is
    /// acknowledged. The task is reaped either way.
    pub async fn wait(self) -> Result<ChatAnswer, ClientError> {
        let task_id = self.handle.id.clone();
        let (result, status) = match self.join.await {
            Ok(joined) => joined,
            Err(err) => {
                let err = TransportError::new(
                    FailureKind::Network,
                    format!("ask request aborted: {err}"),
                );
                let status = self
                    .tracker
                    .lock()
                    .record(&task_id, TaskStatus::Error)
                    .unwrap_or(TaskStatus::Error);
                (Some(Err(err)), status)
            }
        };
        self.tracker.lock().reap(&task_id);

        match (status, result) {
            (TaskStatus::Stopped, _) | (_, None) => {
                kb_info!("Ask {} stopped, answer discarded", task_id);
                Err(ClientError::Stopped { task_id })
            }
            (_, Some(Err(err))) => {
                kb_warn!("Ask {} failed: {}", task_id, err);
                Err(ClientError::Transport(err))
            }
            (_, Some(Ok(response))) => Ok(ChatAnswer {
                task_id,
                conversation_id: response.conversation_id.or(self.request.conversation_id),
                folder_id: self.request.folder_id,
                question: self.request.question,
                answer: response.answer,
                sources: response.sources,
            }),
        }
    }
}
