use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use kb_core::{StopDecision, TaskId, TaskStatus, TaskTracker};
use kb_logging::{kb_info, kb_warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{ClientError, TransportError};

/// Task registry shared by every session of one client.
pub type SharedTracker = Arc<Mutex<TaskTracker>>;

pub fn shared_tracker() -> SharedTracker {
    Arc::new(Mutex::new(TaskTracker::new()))
}

/// Wakes whoever is waiting on a task once its stop has been acknowledged,
/// so the waiter need not hold out for the server's reply.
#[derive(Clone, Default)]
pub struct StopSignals {
    waiting: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl StopSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, task_id: &TaskId) -> CancellationToken {
        let token = CancellationToken::new();
        self.waiting.lock().insert(task_id.clone(), token.clone());
        token
    }

    /// Wakes the waiter of `task_id`, if any.
    pub(crate) fn fire(&self, task_id: &TaskId) {
        if let Some(token) = self.waiting.lock().remove(task_id) {
            token.cancel();
        }
    }

    pub(crate) fn forget(&self, task_id: &TaskId) {
        self.waiting.lock().remove(task_id);
    }
}

/// Requests a stop and, if the task is still live, sends the cancellation
/// through `send` under the id the server knows the task by.
///
/// Returns the status in effect afterwards: `Stopped` once acknowledged, or
/// the terminal status the task had already reached.
pub(crate) async fn stop_with<F, Fut>(
    tracker: &SharedTracker,
    task_id: &TaskId,
    send: F,
) -> Result<TaskStatus, ClientError>
where
    F: FnOnce(TaskId) -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let (decision, wire_id) = {
        let mut tracker = tracker.lock();
        let decision = tracker.request_stop(task_id)?;
        let wire_id = tracker
            .server_id(task_id)
            .map(TaskId::new)
            .unwrap_or_else(|| task_id.clone());
        (decision, wire_id)
    };

    match decision {
        StopDecision::AlreadyTerminal(status) => {
            kb_info!("Task {} already {}, stop not sent", task_id, status);
            Ok(status)
        }
        StopDecision::Send => {
            if let Err(err) = send(wire_id).await {
                kb_warn!("Stop for task {} failed: {}", task_id, err);
                return Err(err.into());
            }
            let status = tracker.lock().acknowledge_stop(task_id)?;
            Ok(status)
        }
    }
}
