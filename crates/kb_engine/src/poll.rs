//! Drives a started server task to a terminal status by repeated status
//! queries.
//!
//! The first query goes out immediately. While the task is live the wait
//! between queries grows from `initial_delay` by `multiplier` up to
//! `max_delay`. Failed queries are retried on their own backoff, which
//! restarts after any successful query; a failure once that backoff has
//! reached `max_delay` is surfaced. Nothing here ever stops a task on
//! timeout: the server job keeps running and the registry entry stays live.

use std::time::Duration;

use kb_core::{TaskId, TaskStatus};
use kb_logging::{kb_debug, kb_info, kb_warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tracker::{stop_with, SharedTracker};
use crate::{ClientError, FailureKind, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Overall budget for one session.
    pub timeout: Duration,
    /// Budget for a single status query.
    pub attempt_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl PollSettings {
    pub fn next_delay(&self, current: Duration) -> Duration {
        let factor = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One status query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<R> {
    pub status: TaskStatus,
    pub report: R,
}

/// Status endpoint of one server task.
#[async_trait::async_trait]
pub trait TaskProbe: Send + Sync {
    type Report: Send;

    async fn observe(&self) -> Result<Observation<Self::Report>, TransportError>;

    /// Sends the cancellation request for the task the server knows as
    /// `wire_id`.
    async fn stop(&self, wire_id: &TaskId) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<R> {
    pub status: TaskStatus,
    /// Report of the query that observed the terminal status.
    pub report: R,
    pub attempts: u32,
    pub elapsed: Duration,
}

pub struct PollingSession {
    settings: PollSettings,
    tracker: SharedTracker,
}

impl PollingSession {
    pub fn new(settings: PollSettings, tracker: SharedTracker) -> Self {
        Self { settings, tracker }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub async fn run<P>(
        &self,
        task_id: &TaskId,
        probe: &P,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome<P::Report>, ClientError>
    where
        P: TaskProbe + ?Sized,
    {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut wait = Duration::ZERO;
        let mut cadence = self.settings.initial_delay;
        let mut retry_delay: Option<Duration> = None;
        let mut attempts = 0u32;

        loop {
            if !wait.is_zero() {
                let wake = (Instant::now() + wait).min(deadline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.cancel(task_id, probe).await),
                    _ = tokio::time::sleep_until(wake) => {}
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = now - started;
                kb_warn!("Task {} still live after {:?}, giving up", task_id, elapsed);
                return Err(ClientError::Timeout {
                    task_id: task_id.clone(),
                    elapsed,
                });
            }

            attempts += 1;
            let budget = self.settings.attempt_timeout.min(deadline - now);
            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancel(task_id, probe).await),
                result = tokio::time::timeout(budget, probe.observe()) => match result {
                    Ok(observed) => observed,
                    Err(_) => Err(TransportError::new(
                        FailureKind::Timeout,
                        format!("status query exceeded {budget:?}"),
                    )),
                },
            };

            match observed {
                Ok(observation) => {
                    retry_delay = None;
                    let status = self.tracker.lock().record(task_id, observation.status)?;
                    kb_debug!("Task {} poll #{} -> {}", task_id, attempts, status);
                    if status.is_terminal() {
                        let elapsed = started.elapsed();
                        kb_info!(
                            "Task {} finished {} after {} polls ({:?})",
                            task_id,
                            status,
                            attempts,
                            elapsed
                        );
                        return Ok(PollOutcome {
                            status,
                            report: observation.report,
                            attempts,
                            elapsed,
                        });
                    }
                    wait = cadence;
                    cadence = self.settings.next_delay(cadence);
                }
                Err(err) => {
                    let next = match retry_delay {
                        Some(current) if current >= self.settings.max_delay => {
                            kb_warn!("Task {} status query failed, giving up: {}", task_id, err);
                            return Err(ClientError::Transport(err));
                        }
                        Some(current) => self.settings.next_delay(current),
                        None => self.settings.initial_delay,
                    };
                    kb_warn!(
                        "Task {} status query failed, retrying in {:?}: {}",
                        task_id,
                        next,
                        err
                    );
                    retry_delay = Some(next);
                    wait = next;
                }
            }
        }
    }

    async fn cancel<P>(&self, task_id: &TaskId, probe: &P) -> ClientError
    where
        P: TaskProbe + ?Sized,
    {
        kb_info!("Polling of task {} cancelled", task_id);
        let sent = stop_with(&self.tracker, task_id, |wire_id| async move {
            probe.stop(&wire_id).await
        })
        .await;
        if let Err(err) = sent {
            kb_warn!("Best-effort stop of task {} failed: {}", task_id, err);
        }
        ClientError::Cancelled {
            task_id: task_id.clone(),
        }
    }
}
