//! Document pipeline state: parse, then chunk, then vectorize.
//!
//! The client refuses to start a stage whose predecessor has not completed,
//! but every status refresh from the server is applied as reported.

use serde::{Deserialize, Serialize};

use crate::{CoreError, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    #[default]
    Pending,
    Parsing,
    Success,
    Error,
}

impl ParseStatus {
    pub fn from_server(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ParseStatus::Pending),
            "parsing" | "running" => Some(ParseStatus::Parsing),
            "success" | "completed" => Some(ParseStatus::Success),
            "error" | "failed" => Some(ParseStatus::Error),
            _ => None,
        }
    }

    pub fn task_status(self) -> TaskStatus {
        match self {
            ParseStatus::Pending => TaskStatus::Pending,
            ParseStatus::Parsing => TaskStatus::Running,
            ParseStatus::Success => TaskStatus::Success,
            ParseStatus::Error => TaskStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub parse_status: ParseStatus,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub vectorize_status: Option<String>,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            file_name: String::new(),
            folder_id: String::new(),
            parse_status: ParseStatus::Pending,
            chunked: false,
            vectorize_status: None,
            chunk_count: None,
            error_message: None,
        }
    }

    pub fn ensure_can_chunk(&self) -> Result<(), CoreError> {
        if self.parse_status != ParseStatus::Success {
            return Err(CoreError::StageNotReady {
                document_id: self.id.clone(),
                required: "parse must succeed before chunking",
            });
        }
        Ok(())
    }

    pub fn ensure_can_vectorize(&self) -> Result<(), CoreError> {
        self.ensure_can_chunk()?;
        if !self.chunked {
            return Err(CoreError::StageNotReady {
                document_id: self.id.clone(),
                required: "document must be chunked before vectorizing",
            });
        }
        Ok(())
    }

    pub fn apply_parse_status(&mut self, status: ParseStatus) {
        self.parse_status = status;
        if status == ParseStatus::Success {
            self.error_message = None;
        }
    }

    /// A chunk operation completed on the server.
    pub fn apply_chunked(&mut self, chunk_count: u32) {
        self.chunked = true;
        self.chunk_count = Some(chunk_count);
    }

    pub fn apply_vectorize_status(
        &mut self,
        status: impl Into<String>,
        chunked: bool,
        chunk_count: Option<u32>,
    ) {
        self.vectorize_status = Some(status.into());
        self.chunked = chunked;
        if chunk_count.is_some() {
            self.chunk_count = chunk_count;
        }
    }

    /// Vectorization state as a task status, if the server reported one we know.
    pub fn vectorize_task_status(&self) -> Option<TaskStatus> {
        self.vectorize_status
            .as_deref()
            .and_then(TaskStatus::from_server)
    }
}
