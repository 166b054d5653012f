use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Evidence the server attached to an answer or a generated section.
///
/// `score` is a relevance value with no guaranteed range; only its order
/// is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Most relevant first. NaN scores sort last.
pub fn sort_by_relevance(sources: &mut [Source]) {
    sources.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.total_cmp(&a.score),
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>, folder_id: Option<String>) -> Self {
        let now = crate::now_timestamp();
        Self {
            id: id.into(),
            title: title.into(),
            folder_id,
            created_at: now.clone(),
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn push_message(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        sources: Vec<Source>,
    ) -> &Message {
        let timestamp = crate::now_timestamp();
        self.updated_at = timestamp.clone();
        self.messages.push(Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            sources,
            timestamp,
        });
        &self.messages[self.messages.len() - 1]
    }
}
