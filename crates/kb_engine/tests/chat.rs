use std::time::Duration;

use kb_core::{update, AppState, Change, CoreError, MessageRole, TaskKind, TaskStatus};
use kb_engine::{AskRequest, ClientError, FailureKind, KbClient, PollSettings};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> KbClient {
    KbClient::connect(
        kb_engine::ApiSettings {
            base_url: format!("{}/api", server.uri()),
            ..kb_engine::ApiSettings::default()
        },
        PollSettings::default(),
    )
    .expect("client")
}

async fn mount_stop(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/chat/stop"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "stopped or finished"})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_answer_creates_the_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .and(body_partial_json(json!({"question": "What is X?", "folderId": "f1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversationId": "c1",
            "answer": "X is...",
            "sources": [
                {"id": "s1", "document_id": "d1", "document_name": "Manual",
                 "title": "Intro", "content": "X is defined as", "score": 0.82},
                {"id": "s2", "document_id": "d2", "content": "see also", "score": 14.5}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let pending = client
        .chat()
        .ask(AskRequest::new("What is X?").in_folder("f1"))
        .unwrap();
    let answer = pending.wait().await.unwrap();

    assert_eq!(answer.conversation_id.as_deref(), Some("c1"));
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[1].document_name, None);
    assert_eq!(answer.sources[1].score, 14.5);

    let mut state = AppState::new();
    let changes = update(&mut state, answer.into_msg()).unwrap();
    assert_eq!(
        changes,
        vec![Change::ConversationUpdated {
            conversation_id: "c1".to_string(),
            created: true,
        }]
    );
    let conversation = state.conversation("c1").unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].role, MessageRole::Assistant);
    assert_eq!(conversation.messages[0].content, "X is...");
    assert_eq!(conversation.messages[0].sources.len(), 2);
    assert!(client.tracker().lock().is_empty());
}

#[tokio::test]
async fn ask_sends_the_client_task_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "ok", "sources": []})))
        .mount(&server)
        .await;

    let client = client(&server);
    let pending = client
        .chat()
        .ask(AskRequest::new("Why?").in_conversation("c7"))
        .unwrap();
    let task_id = pending.task_id().clone();
    let answer = pending.wait().await.unwrap();

    assert_eq!(answer.conversation_id.as_deref(), Some("c7"));
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["taskId"], json!(task_id.as_str()));
    assert_eq!(body["conversationId"], json!("c7"));
}

#[tokio::test]
async fn one_ask_per_conversation_at_a_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "slow", "sources": []}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let chat = client.chat();
    let first = chat
        .ask(AskRequest::new("one").in_conversation("c1"))
        .unwrap();

    let second = chat.ask(AskRequest::new("two").in_conversation("c1"));
    assert!(matches!(
        second,
        Err(ClientError::Core(CoreError::DuplicateTask {
            kind: TaskKind::ChatAsk,
            ..
        }))
    ));
    let other = chat
        .ask(AskRequest::new("three").in_conversation("c2"))
        .unwrap();

    first.wait().await.unwrap();
    other.wait().await.unwrap();
    let third = chat
        .ask(AskRequest::new("four").in_conversation("c1"))
        .unwrap();
    third.wait().await.unwrap();
}

#[tokio::test]
async fn stop_before_the_answer_discards_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"conversationId": "c1", "answer": "partial", "sources": []}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    mount_stop(&server).await;

    let client = client(&server);
    let chat = client.chat();
    let pending = chat.ask(AskRequest::new("long question")).unwrap();
    let task_id = pending.task_id().clone();

    let status = chat.stop(&task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Stopped);

    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, ClientError::Stopped { task_id: ref id } if *id == task_id));
    assert!(client.tracker().lock().is_empty());

    let stop_body: serde_json::Value = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|request| request.url.path() == "/api/chat/stop")
        .unwrap()
        .body_json()
        .unwrap();
    assert_eq!(stop_body, json!({"taskId": task_id.as_str()}));
}

#[tokio::test]
async fn stop_after_the_answer_arrived_keeps_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"conversationId": "c1", "answer": "complete", "sources": []})),
        )
        .mount(&server)
        .await;
    mount_stop(&server).await;

    let client = client(&server);
    let chat = client.chat();
    let pending = chat.ask(AskRequest::new("quick question")).unwrap();
    while !pending.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = chat.stop(pending.task_id()).await.unwrap();
    assert_eq!(status, TaskStatus::Success);

    let answer = pending.wait().await.unwrap();
    assert_eq!(answer.answer, "complete");
    let stops = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/api/chat/stop")
        .count();
    assert_eq!(stops, 0);
}

#[tokio::test]
async fn failed_ask_leaves_no_message_to_apply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"detail": "model unavailable"})),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let pending = client
        .chat()
        .ask(AskRequest::new("anything").in_conversation("c1"))
        .unwrap();
    let err = pending.wait().await.unwrap_err();

    match err {
        ClientError::Transport(err) => {
            assert_eq!(err.kind, FailureKind::HttpStatus(500));
            assert_eq!(err.message, "model unavailable");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(client.tracker().lock().is_empty());
}

#[tokio::test]
async fn stop_of_a_reaped_ask_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "done"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let chat = client.chat();
    let pending = chat.ask(AskRequest::new("q")).unwrap();
    let task_id = pending.task_id().clone();
    pending.wait().await.unwrap();

    assert!(matches!(
        chat.stop(&task_id).await,
        Err(ClientError::Core(CoreError::UnknownTask(_)))
    ));
}

async fn mount_slow_answer(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"conversationId": "c1", "answer": "late", "sources": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(server)
        .await;
}

async fn wait_for_empty_tracker(client: &KbClient) -> bool {
    for _ in 0..100 {
        if client.tracker().lock().is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn acknowledged_stop_releases_the_waiter_before_the_reply() {
    let server = MockServer::start().await;
    mount_slow_answer(&server).await;
    mount_stop(&server).await;

    let client = client(&server);
    let pending = client.chat().ask(AskRequest::new("slow question")).unwrap();
    let task_id = pending.task_id().clone();

    // The stop goes through the client, not the chat session that asked.
    assert_eq!(client.stop(&task_id).await.unwrap(), TaskStatus::Stopped);

    let err = tokio::time::timeout(Duration::from_millis(500), pending.wait())
        .await
        .expect("wait returns without the reply")
        .unwrap_err();
    assert!(matches!(err, ClientError::Stopped { .. }));
    assert!(client.tracker().lock().is_empty());
}

#[tokio::test]
async fn dropped_answer_is_reaped_once_stopped() {
    let server = MockServer::start().await;
    mount_slow_answer(&server).await;
    mount_stop(&server).await;

    let client = client(&server);
    let chat = client.chat();
    let pending = chat.ask(AskRequest::new("abandoned")).unwrap();
    let task_id = pending.task_id().clone();
    drop(pending);
    assert_eq!(client.tracker().lock().len(), 1);

    assert_eq!(chat.stop(&task_id).await.unwrap(), TaskStatus::Stopped);
    assert!(wait_for_empty_tracker(&client).await);

    // The conversation slot is free again.
    assert!(chat.ask(AskRequest::new("abandoned")).is_ok());
}

#[tokio::test]
async fn dropped_answer_is_reaped_when_already_finished() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/ask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "done"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let pending = client.chat().ask(AskRequest::new("q")).unwrap();
    while !pending.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.tracker().lock().len(), 1);

    drop(pending);
    assert!(client.tracker().lock().is_empty());
}
