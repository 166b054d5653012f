use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use kb_core::{TaskId, TaskKind, TaskStatus};
use kb_engine::{
    shared_tracker, CancellationToken, ClientError, FailureKind, Observation, PollSettings,
    PollingSession, SharedTracker, TaskProbe, TransportError,
};
use pretty_assertions::assert_eq;

/// Replays a fixed script of status answers; the last entry repeats.
struct ScriptedProbe {
    script: Mutex<VecDeque<Result<TaskStatus, TransportError>>>,
    stop_result: Result<(), TransportError>,
    stops: Mutex<Vec<TaskId>>,
    observed: Mutex<u32>,
}

impl ScriptedProbe {
    fn new(script: Vec<Result<TaskStatus, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stop_result: Ok(()),
            stops: Mutex::new(Vec::new()),
            observed: Mutex::new(0),
        }
    }

    fn failing_stop(mut self) -> Self {
        self.stop_result = Err(network("stop refused"));
        self
    }

    fn stops(&self) -> Vec<TaskId> {
        self.stops.lock().unwrap().clone()
    }

    fn observed(&self) -> u32 {
        *self.observed.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl TaskProbe for ScriptedProbe {
    type Report = u32;

    async fn observe(&self) -> Result<Observation<u32>, TransportError> {
        let mut observed = self.observed.lock().unwrap();
        *observed += 1;
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        };
        next.map(|status| Observation {
            status,
            report: *observed,
        })
    }

    async fn stop(&self, wire_id: &TaskId) -> Result<(), TransportError> {
        self.stops.lock().unwrap().push(wire_id.clone());
        self.stop_result.clone()
    }
}

fn network(message: &str) -> TransportError {
    TransportError::new(FailureKind::Network, message)
}

fn settings() -> PollSettings {
    PollSettings {
        initial_delay: Duration::from_millis(500),
        multiplier: 1.5,
        max_delay: Duration::from_secs(5),
        timeout: Duration::from_secs(60),
        attempt_timeout: Duration::from_secs(10),
    }
}

fn started(tracker: &SharedTracker) -> TaskId {
    tracker
        .lock()
        .start(TaskKind::Vectorize, "doc1")
        .unwrap()
        .id
}

#[tokio::test(start_paused = true)]
async fn stops_on_first_terminal_status_with_growing_delays() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![
        Ok(TaskStatus::Running),
        Ok(TaskStatus::Running),
        Ok(TaskStatus::Running),
        Ok(TaskStatus::Success),
    ]);
    let session = PollingSession::new(settings(), tracker.clone());

    let outcome = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Success);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.report, 4);
    // 500ms + 750ms + 1125ms between the four queries.
    assert_eq!(outcome.elapsed, Duration::from_millis(2375));
    assert_eq!(tracker.lock().poll(&id), Ok(TaskStatus::Success));
    assert!(tracker.lock().active_for(TaskKind::Vectorize, "doc1").is_none());
}

#[tokio::test(start_paused = true)]
async fn error_status_is_terminal() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Pending), Ok(TaskStatus::Error)]);
    let session = PollingSession::new(settings(), tracker.clone());

    let outcome = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Error);
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_task_live() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Running)]);
    let session = PollingSession::new(
        PollSettings {
            timeout: Duration::from_secs(3),
            ..settings()
        },
        tracker.clone(),
    );

    let err = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ClientError::Timeout { task_id, elapsed } => {
            assert_eq!(task_id, id);
            assert_eq!(elapsed, Duration::from_secs(3));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(tracker.lock().poll(&id), Ok(TaskStatus::Running));
    assert!(probe.stops().is_empty());
    assert!(!tracker.lock().reap(&id));
}

#[tokio::test(start_paused = true)]
async fn transient_query_failures_are_retried() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![
        Err(network("connection reset")),
        Ok(TaskStatus::Running),
        Err(network("connection reset")),
        Err(network("connection reset")),
        Ok(TaskStatus::Success),
    ]);
    let session = PollingSession::new(settings(), tracker.clone());

    let outcome = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Success);
    assert_eq!(outcome.attempts, 5);
}

#[tokio::test(start_paused = true)]
async fn failures_past_the_delay_ceiling_escalate() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![Err(network("unreachable"))]);
    let session = PollingSession::new(
        PollSettings {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            ..settings()
        },
        tracker.clone(),
    );

    let err = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ClientError::Transport(err) => assert_eq!(err.kind, FailureKind::Network),
        other => panic!("expected transport error, got {other:?}"),
    }
    // Retries after 500ms and 1s, then gives up.
    assert_eq!(probe.observed(), 3);
    // No query ever succeeded, so nothing was recorded and the task stays live.
    assert_eq!(tracker.lock().poll(&id), Ok(TaskStatus::Pending));
    assert!(!tracker.lock().reap(&id));
}

#[tokio::test(start_paused = true)]
async fn cancellation_sends_one_stop_and_records_it() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Running)]);
    let session = PollingSession::new(settings(), tracker.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = session.run(&id, &probe, &cancel).await.unwrap_err();

    assert!(matches!(err, ClientError::Cancelled { ref task_id } if *task_id == id));
    assert_eq!(probe.stops(), vec![id.clone()]);
    assert_eq!(probe.observed(), 1);
    assert_eq!(tracker.lock().poll(&id), Ok(TaskStatus::Stopped));
}

#[tokio::test(start_paused = true)]
async fn cancellation_uses_the_server_task_id() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    tracker.lock().attach_server_id(&id, "srv-7").unwrap();
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Running)]);
    let session = PollingSession::new(settings(), tracker.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let _ = session.run(&id, &probe, &cancel).await;

    assert_eq!(probe.stops(), vec![TaskId::new("srv-7")]);
}

#[tokio::test(start_paused = true)]
async fn failed_stop_on_cancel_keeps_task_live() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Running)]).failing_stop();
    let session = PollingSession::new(settings(), tracker.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = session.run(&id, &probe, &cancel).await.unwrap_err();

    assert!(matches!(err, ClientError::Cancelled { .. }));
    assert_eq!(probe.stops().len(), 1);
    assert_eq!(tracker.lock().poll(&id), Ok(TaskStatus::Running));
    assert!(tracker.lock().stop_requested(&id));
}

#[tokio::test(start_paused = true)]
async fn stop_acknowledged_before_a_late_success_wins() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    tracker.lock().request_stop(&id).unwrap();
    tracker.lock().acknowledge_stop(&id).unwrap();
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Success)]);
    let session = PollingSession::new(settings(), tracker.clone());

    let outcome = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn reaped_task_cannot_be_polled() {
    let tracker = shared_tracker();
    let id = started(&tracker);
    tracker.lock().record(&id, TaskStatus::Success).unwrap();
    assert!(tracker.lock().reap(&id));
    let probe = ScriptedProbe::new(vec![Ok(TaskStatus::Running)]);
    let session = PollingSession::new(settings(), tracker);

    let err = session
        .run(&id, &probe, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Core(kb_core::CoreError::UnknownTask(_))
    ));
}

#[test]
fn delay_growth_is_capped() {
    let settings = settings();
    assert_eq!(
        settings.next_delay(Duration::from_millis(500)),
        Duration::from_millis(750)
    );
    assert_eq!(
        settings.next_delay(Duration::from_secs(4)),
        Duration::from_secs(5)
    );

    let odd = PollSettings {
        multiplier: f64::NAN,
        ..settings
    };
    assert_eq!(
        odd.next_delay(Duration::from_millis(500)),
        Duration::from_millis(500)
    );
}
