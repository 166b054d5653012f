//! Request and response bodies of the knowledge-base HTTP service.

use std::fmt;
use std::str::FromStr;

use kb_core::{Document, DocumentProject, Msg, OutlineNode, Source};
use serde::{Deserialize, Serialize};

/// `{taskId, message}` returned when a background job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAccepted {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStatusReport {
    #[serde(default)]
    pub document_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub parsed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorizeStatusReport {
    #[serde(default)]
    pub document_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    #[serde(default)]
    pub document_id: Option<String>,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentList {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub total: usize,
}

/// One page of `GET /document-projects`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub projects: Vec<DocumentProject>,
    /// Count across all pages.
    #[serde(default)]
    pub total: usize,
}

impl ProjectList {
    pub fn into_msgs(self) -> Vec<Msg> {
        self.projects.into_iter().map(Msg::ProjectLoaded).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateProjectBody<'a> {
    pub title: &'a str,
    pub folder_ids: &'a [String],
}

/// Summary returned when a folder-wide job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAccepted {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default, alias = "alreadyParsed", alias = "alreadyVectorized")]
    pub already_done: usize,
    #[serde(default, alias = "pendingParse", alias = "pendingVectorization")]
    pub pending: usize,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchParseMode {
    Incremental,
    Full,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchVectorizeMode {
    Incremental,
    Full,
}

impl BatchParseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchParseMode::Incremental => "incremental",
            BatchParseMode::Full => "full",
            BatchParseMode::Failed => "failed",
        }
    }
}

impl BatchVectorizeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchVectorizeMode::Incremental => "incremental",
            BatchVectorizeMode::Full => "full",
        }
    }
}

impl fmt::Display for BatchParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BatchVectorizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incremental" => Ok(BatchParseMode::Incremental),
            "full" => Ok(BatchParseMode::Full),
            "failed" => Ok(BatchParseMode::Failed),
            other => Err(format!("unknown batch parse mode '{other}'")),
        }
    }
}

impl FromStr for BatchVectorizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incremental" => Ok(BatchVectorizeMode::Incremental),
            "full" => Ok(BatchVectorizeMode::Full),
            other => Err(format!("unknown batch vectorize mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModeBody<M> {
    pub mode: M,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskBody {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Set by servers that report an interrupted generation explicitly.
    #[serde(default)]
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StopBody<'a> {
    pub task_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TopicBody<'a> {
    pub topic: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutlineBody<'a> {
    pub outline: &'a [OutlineNode],
    pub locked: bool,
}

/// Body shared by first generation and regeneration of a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub section_id: String,
    pub section_title: String,
    pub context_sections: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub custom_prompt: String,
}

/// A paragraph produced by the generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedParagraph {
    #[serde(default, alias = "paragraphId")]
    pub paragraph_id: Option<String>,
    #[serde(default, alias = "sectionId")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParagraphEditBody<'a> {
    pub section_id: &'a str,
    pub paragraph_id: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestoreBody<'a> {
    pub section_id: &'a str,
    pub paragraph_id: &'a str,
    pub version_index: usize,
}

/// Error payload of a non-2xx response.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        match self.detail {
            Some(serde_json::Value::String(text)) => Some(text),
            Some(other) => Some(other.to_string()),
            None => self.message,
        }
    }
}
