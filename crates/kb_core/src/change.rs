/// Notification of a state mutation, returned by [`crate::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    SessionRestored { conversations: usize, projects: usize },
    DocumentUpdated { document_id: String },
    ConversationUpdated { conversation_id: String, created: bool },
    ProjectUpdated { project_id: String },
    ParagraphChanged {
        project_id: String,
        section_id: String,
        paragraph_id: String,
    },
}
