use kb_core::{
    update, AppState, Change, CoreError, Document, DocumentProject, MessageRole, Msg,
    OutlineNode, ParseStatus, Source,
};
use pretty_assertions::assert_eq;

fn parsed_and_chunked(id: &str) -> Document {
    let mut doc = Document::new(id, "Manual");
    doc.apply_parse_status(ParseStatus::Success);
    doc.apply_chunked(3);
    doc
}

fn project_with_outline() -> AppState {
    let mut state = AppState::new();
    let mut project = DocumentProject::new("p1", "Report", vec!["f1".to_string()]);
    project
        .replace_outline(vec![
            OutlineNode::new("s1", "Intro"),
            OutlineNode::new("s2", "Body"),
        ])
        .unwrap();
    update(&mut state, Msg::ProjectLoaded(project)).unwrap();
    assert!(state.consume_dirty());
    state
}

#[test]
fn vectorize_success_marks_document_chunked_with_count() {
    let mut state = AppState::new();
    update(&mut state, Msg::DocumentsLoaded(vec![parsed_and_chunked("doc1")])).unwrap();

    let changes = update(
        &mut state,
        Msg::VectorizeStatusObserved {
            document_id: "doc1".to_string(),
            status: "success".to_string(),
            chunked: true,
            chunk_count: Some(12),
        },
    )
    .unwrap();

    assert_eq!(
        changes,
        vec![Change::DocumentUpdated {
            document_id: "doc1".to_string()
        }]
    );
    let doc = state.document("doc1").unwrap();
    assert!(doc.chunked);
    assert_eq!(doc.chunk_count, Some(12));
    assert_eq!(doc.vectorize_status.as_deref(), Some("success"));
}

#[test]
fn stage_preconditions_are_enforced() {
    let mut doc = Document::new("doc1", "Manual");
    assert!(matches!(
        doc.ensure_can_chunk(),
        Err(CoreError::StageNotReady { .. })
    ));
    doc.apply_parse_status(ParseStatus::Success);
    doc.ensure_can_chunk().unwrap();
    assert!(matches!(
        doc.ensure_can_vectorize(),
        Err(CoreError::StageNotReady { .. })
    ));
    doc.apply_chunked(4);
    doc.ensure_can_vectorize().unwrap();
}

#[test]
fn status_refresh_is_idempotent_and_tolerates_unknown_documents() {
    let mut state = AppState::new();
    let msg = Msg::ParseStatusObserved {
        document_id: "doc9".to_string(),
        status: ParseStatus::Success,
    };
    update(&mut state, msg.clone()).unwrap();
    let once = state.document("doc9").cloned();
    update(&mut state, msg).unwrap();
    assert_eq!(state.document("doc9").cloned(), once);
    assert_eq!(once.unwrap().parse_status, ParseStatus::Success);
}

#[test]
fn answer_without_conversation_creates_one_with_assistant_message() {
    let mut state = AppState::new();
    let sources = vec![Source {
        id: "src1".to_string(),
        document_id: "doc1".to_string(),
        document_name: Some("Manual".to_string()),
        title: Some("Chapter 1".to_string()),
        content: "X is defined as...".to_string(),
        score: 3.7,
    }];

    let changes = update(
        &mut state,
        Msg::AnswerReceived {
            conversation_id: Some("c1".to_string()),
            folder_id: Some("f1".to_string()),
            question: "What is X?".to_string(),
            answer: "X is...".to_string(),
            sources: sources.clone(),
        },
    )
    .unwrap();

    assert_eq!(
        changes,
        vec![Change::ConversationUpdated {
            conversation_id: "c1".to_string(),
            created: true
        }]
    );
    let conversation = state.conversation("c1").unwrap();
    assert_eq!(conversation.title, "What is X?");
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].role, MessageRole::Assistant);
    assert_eq!(conversation.messages[0].content, "X is...");
    assert_eq!(conversation.messages[0].sources, sources);
}

#[test]
fn answer_with_no_id_anywhere_gets_a_local_conversation() {
    let mut state = AppState::new();
    let changes = update(
        &mut state,
        Msg::AnswerReceived {
            conversation_id: None,
            folder_id: None,
            question: "Q".to_string(),
            answer: "A".to_string(),
            sources: Vec::new(),
        },
    )
    .unwrap();
    let Change::ConversationUpdated {
        conversation_id, ..
    } = &changes[0]
    else {
        panic!("unexpected change {changes:?}");
    };
    assert!(conversation_id.starts_with("local-"));
    assert_eq!(state.conversations().count(), 1);
}

#[test]
fn generated_content_requires_a_known_section() {
    let mut state = project_with_outline();
    let err = update(
        &mut state,
        Msg::ContentGenerated {
            project_id: "p1".to_string(),
            section_id: "missing".to_string(),
            paragraph_id: None,
            timestamp: None,
            content: "text".to_string(),
            sources: Vec::new(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { what: "section", .. }));
    assert!(!state.consume_dirty());
}

#[test]
fn regenerate_then_restore_through_update() {
    let mut state = project_with_outline();
    update(
        &mut state,
        Msg::ContentGenerated {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: Some("para".to_string()),
            timestamp: Some("2024-01-01T00:00:00".to_string()),
            content: "first".to_string(),
            sources: Vec::new(),
        },
    )
    .unwrap();
    update(
        &mut state,
        Msg::ParagraphRegenerated {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "para".to_string(),
            server_paragraph_id: None,
            content: "second".to_string(),
            sources: None,
        },
    )
    .unwrap();

    let failed = update(
        &mut state,
        Msg::ParagraphRestored {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "para".to_string(),
            version_index: 5,
        },
    );
    assert!(matches!(failed, Err(CoreError::IndexOutOfRange { .. })));

    update(
        &mut state,
        Msg::ParagraphRestored {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "para".to_string(),
            version_index: 0,
        },
    )
    .unwrap();

    let paragraph = state
        .project("p1")
        .unwrap()
        .sections()
        .paragraph("s1", "para")
        .unwrap();
    assert_eq!(paragraph.content, "first");
    let history: Vec<_> = paragraph.versions.iter().map(|v| v.content.as_str()).collect();
    assert_eq!(history, vec!["first", "second"]);
}

#[test]
fn regenerated_paragraph_follows_the_server_id() {
    let mut state = project_with_outline();
    update(
        &mut state,
        Msg::ContentGenerated {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: Some("para".to_string()),
            timestamp: Some("2024-01-01T00:00:00".to_string()),
            content: "first".to_string(),
            sources: Vec::new(),
        },
    )
    .unwrap();

    let changes = update(
        &mut state,
        Msg::ParagraphRegenerated {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "para".to_string(),
            server_paragraph_id: Some("para-v2".to_string()),
            content: "second".to_string(),
            sources: None,
        },
    )
    .unwrap();
    assert_eq!(
        changes,
        vec![Change::ParagraphChanged {
            project_id: "p1".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "para-v2".to_string(),
        }]
    );

    let sections = state.project("p1").unwrap().sections();
    assert!(sections.paragraph("s1", "para").is_none());
    let paragraph = sections.paragraph("s1", "para-v2").unwrap();
    assert_eq!(paragraph.content, "second");
    assert_eq!(paragraph.versions.len(), 1);
    assert_eq!(paragraph.versions[0].content, "first");
}

#[test]
fn locked_outline_edit_is_rejected_and_state_kept() {
    let mut state = project_with_outline();
    update(
        &mut state,
        Msg::OutlineLockChanged {
            project_id: "p1".to_string(),
            locked: true,
        },
    )
    .unwrap();
    assert!(state.consume_dirty());
    let before = state.clone();

    let err = update(
        &mut state,
        Msg::OutlineEdited {
            project_id: "p1".to_string(),
            outline: vec![OutlineNode::new("s9", "Other")],
        },
    )
    .unwrap_err();
    assert_eq!(err, CoreError::OutlineLocked);
    assert_eq!(state, before);
}

#[test]
fn unknown_project_is_not_found() {
    let mut state = AppState::new();
    let err = update(
        &mut state,
        Msg::ParagraphEdited {
            project_id: "ghost".to_string(),
            section_id: "s1".to_string(),
            paragraph_id: "p".to_string(),
            content: "x".to_string(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { what: "project", .. }));
}
