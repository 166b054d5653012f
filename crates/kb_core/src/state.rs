use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Conversation, Document, DocumentProject};

/// Client state for one session: the context object handed to every
/// component that reads or merges server results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppState {
    pub(crate) documents: BTreeMap<String, Document>,
    pub(crate) conversations: BTreeMap<String, Conversation>,
    pub(crate) projects: BTreeMap<String, DocumentProject>,
    dirty: bool,
}

/// What survives between sessions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub projects: Vec<DocumentProject>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn documents_in_folder<'a>(&'a self, folder_id: &'a str) -> impl Iterator<Item = &'a Document> {
        self.documents
            .values()
            .filter(move |doc| doc.folder_id == folder_id)
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn project(&self, id: &str) -> Option<&DocumentProject> {
        self.projects.get(id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &DocumentProject> {
        self.projects.values()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversations: self.conversations.values().cloned().collect(),
            projects: self.projects.values().cloned().collect(),
        }
    }

    /// Returns whether anything changed since the last call, and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}
