use kb_core::{CoreError, ParagraphLedger, Source};

fn source(id: &str, score: f64) -> Source {
    Source {
        id: id.to_string(),
        document_id: "doc1".to_string(),
        document_name: Some("Handbook".to_string()),
        title: None,
        content: "excerpt".to_string(),
        score,
    }
}

fn ledger_with_paragraph(content: &str) -> (ParagraphLedger, String) {
    let mut ledger = ParagraphLedger::new();
    let id = ledger
        .append_generated("s1", content, vec![source("src1", 0.8)])
        .id
        .clone();
    (ledger, id)
}

#[test]
fn append_generated_always_creates_a_new_paragraph() {
    let mut ledger = ParagraphLedger::new();
    let first = ledger.append_generated("s1", "one", Vec::new()).id.clone();
    let second = ledger.append_generated("s1", "two", Vec::new()).id.clone();

    assert_ne!(first, second);
    let section = ledger.section("s1").unwrap();
    assert_eq!(section.paragraphs.len(), 2);
    assert!(section.paragraphs.iter().all(|p| p.versions.is_empty()));
}

#[test]
fn append_generated_as_keeps_server_identity() {
    let mut ledger = ParagraphLedger::new();
    let paragraph = ledger
        .append_generated_as("s1", "p-9", "2024-05-01T10:00:00", "body", Vec::new())
        .unwrap();
    assert_eq!(paragraph.id, "p-9");
    assert_eq!(paragraph.timestamp, "2024-05-01T10:00:00");

    let err = ledger
        .append_generated_as("s1", "p-9", "later", "again", Vec::new())
        .unwrap_err();
    assert_eq!(err, CoreError::DuplicateParagraphId("p-9".to_string()));
}

#[test]
fn n_regenerations_leave_n_versions_oldest_first() {
    let (mut ledger, id) = ledger_with_paragraph("original");
    for round in 1..=4 {
        ledger
            .regenerate("s1", &id, format!("rewrite {round}"))
            .unwrap();
        let paragraph = ledger.paragraph("s1", &id).unwrap();
        assert_eq!(paragraph.versions.len(), round);
        assert_eq!(paragraph.versions[0].content, "original");
    }
    let paragraph = ledger.paragraph("s1", &id).unwrap();
    assert_eq!(paragraph.content, "rewrite 4");
    assert_eq!(paragraph.versions[3].content, "rewrite 3");
}

#[test]
fn regenerate_as_moves_history_to_the_new_id() {
    let (mut ledger, id) = ledger_with_paragraph("original");
    ledger.regenerate("s1", &id, "second").unwrap();

    let paragraph = ledger.regenerate_as("s1", &id, "srv-2", "third").unwrap();
    assert_eq!(paragraph.id, "srv-2");
    assert_eq!(paragraph.content, "third");
    let history: Vec<_> = paragraph.versions.iter().map(|v| v.content.as_str()).collect();
    assert_eq!(history, vec!["original", "second"]);
    assert!(ledger.paragraph("s1", &id).is_none());
    assert_eq!(ledger.section("s1").unwrap().paragraphs.len(), 1);
}

#[test]
fn regenerate_as_refuses_an_id_already_in_the_section() {
    let (mut ledger, id) = ledger_with_paragraph("original");
    let other = ledger.append_generated("s1", "other", Vec::new()).id.clone();
    let before = ledger.clone();

    let err = ledger.regenerate_as("s1", &id, &other, "new").unwrap_err();
    assert_eq!(err, CoreError::DuplicateParagraphId(other));
    assert_eq!(ledger, before);
}

#[test]
fn set_content_does_not_create_versions() {
    let (mut ledger, id) = ledger_with_paragraph("original");
    ledger.set_content("s1", &id, "hand edited").unwrap();

    let paragraph = ledger.paragraph("s1", &id).unwrap();
    assert_eq!(paragraph.content, "hand edited");
    assert!(paragraph.versions.is_empty());
}

#[test]
fn restore_pushes_current_and_keeps_the_restored_entry() {
    let (mut ledger, id) = ledger_with_paragraph("v0");
    ledger.regenerate("s1", &id, "v1").unwrap();
    ledger.regenerate("s1", &id, "v2").unwrap();

    let paragraph = ledger.restore("s1", &id, 0).unwrap();
    assert_eq!(paragraph.content, "v0");
    let history: Vec<_> = paragraph.versions.iter().map(|v| v.content.as_str()).collect();
    assert_eq!(history, vec!["v0", "v1", "v2"]);
}

#[test]
fn restoring_the_version_just_pushed_undoes_a_restore() {
    let (mut ledger, id) = ledger_with_paragraph("v0");
    ledger.regenerate("s1", &id, "v1").unwrap();
    ledger.regenerate("s1", &id, "v2").unwrap();
    let before_len = ledger.paragraph("s1", &id).unwrap().versions.len();

    ledger.restore("s1", &id, 1).unwrap();
    let last = ledger.paragraph("s1", &id).unwrap().versions.len() - 1;
    let paragraph = ledger.restore("s1", &id, last).unwrap();

    assert_eq!(paragraph.content, "v2");
    assert_eq!(paragraph.versions.len(), before_len + 2);
}

#[test]
fn restore_out_of_range_leaves_paragraph_untouched() {
    let (mut ledger, id) = ledger_with_paragraph("v0");
    ledger.regenerate("s1", &id, "v1").unwrap();
    let before = ledger.paragraph("s1", &id).unwrap().clone();

    let err = ledger.restore("s1", &id, 1).unwrap_err();
    assert_eq!(err, CoreError::IndexOutOfRange { index: 1, len: 1 });
    assert_eq!(ledger.paragraph("s1", &id).unwrap(), &before);

    let (mut fresh, fresh_id) = ledger_with_paragraph("only");
    assert!(matches!(
        fresh.restore("s1", &fresh_id, 0),
        Err(CoreError::IndexOutOfRange { index: 0, len: 0 })
    ));
}

#[test]
fn missing_section_or_paragraph_is_not_found() {
    let (mut ledger, id) = ledger_with_paragraph("v0");
    assert!(matches!(
        ledger.set_content("nope", &id, "x"),
        Err(CoreError::NotFound { what: "section", .. })
    ));
    assert!(matches!(
        ledger.regenerate("s1", "nope", "x"),
        Err(CoreError::NotFound { what: "paragraph", .. })
    ));
    assert!(matches!(
        ledger.restore("s1", "nope", 0),
        Err(CoreError::NotFound { what: "paragraph", .. })
    ));
}

#[test]
fn paragraphs_accept_server_paragraph_id_field() {
    let json = r#"{
        "s1": {
            "sectionId": "s1",
            "paragraphs": [
                {"paragraph_id": "p1", "content": "now", "timestamp": "t2",
                 "versions": [{"content": "then", "timestamp": "t1"}]}
            ],
            "sources": [{"id": "x", "document_id": "d", "content": "c", "score": 12.5}]
        }
    }"#;
    let ledger: ParagraphLedger = serde_json::from_str(json).unwrap();
    let paragraph = ledger.paragraph("s1", "p1").unwrap();
    assert_eq!(paragraph.versions[0].content, "then");
    let section = ledger.section("s1").unwrap();
    assert_eq!(section.sources[0].document_name, None);
    assert_eq!(section.sources[0].score, 12.5);
}
