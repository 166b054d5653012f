use crate::{Conversation, Document, DocumentProject, OutlineNode, ParseStatus, SessionSnapshot, Source};

/// Results observed from the server (or the user) that must be merged into
/// [`crate::AppState`].
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Restore conversations and projects saved by a previous session.
    Restore(SessionSnapshot),
    /// Fresh document records, e.g. from a folder listing.
    DocumentsLoaded(Vec<Document>),
    ParseStatusObserved {
        document_id: String,
        status: ParseStatus,
    },
    ChunkCompleted {
        document_id: String,
        chunk_count: u32,
    },
    VectorizeStatusObserved {
        document_id: String,
        status: String,
        chunked: bool,
        chunk_count: Option<u32>,
    },
    /// A completed ask. `conversation_id` is absent when neither the caller
    /// nor the server supplied one.
    AnswerReceived {
        conversation_id: Option<String>,
        folder_id: Option<String>,
        question: String,
        answer: String,
        sources: Vec<Source>,
    },
    ConversationLoaded(Conversation),
    ProjectLoaded(DocumentProject),
    OutlineEdited {
        project_id: String,
        outline: Vec<OutlineNode>,
    },
    OutlineLockChanged {
        project_id: String,
        locked: bool,
    },
    /// First generation for a section. Server-assigned id and timestamp are
    /// kept when present.
    ContentGenerated {
        project_id: String,
        section_id: String,
        paragraph_id: Option<String>,
        timestamp: Option<String>,
        content: String,
        sources: Vec<Source>,
    },
    /// `server_paragraph_id` is set when the server issued a new id for the
    /// regenerated paragraph; the local paragraph moves to it.
    ParagraphRegenerated {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        server_paragraph_id: Option<String>,
        content: String,
        sources: Option<Vec<Source>>,
    },
    ParagraphEdited {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        content: String,
    },
    ParagraphRestored {
        project_id: String,
        section_id: String,
        paragraph_id: String,
        version_index: usize,
    },
}
