use std::sync::Arc;

use kb_core::{Document, Msg, ParseStatus, TaskId, TaskStatus};
use kb_logging::kb_debug;

use crate::poll::{Observation, TaskProbe};
use crate::{KnowledgeApi, TransportError};

/// Status probes whose reports are ready to merge into client state.
pub type MsgProbe = dyn TaskProbe<Report = Vec<Msg>>;

pub struct ParseProbe {
    api: Arc<dyn KnowledgeApi>,
    document_id: String,
}

impl ParseProbe {
    pub fn new(api: Arc<dyn KnowledgeApi>, document_id: impl Into<String>) -> Self {
        Self {
            api,
            document_id: document_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl TaskProbe for ParseProbe {
    type Report = Vec<Msg>;

    async fn observe(&self) -> Result<Observation<Vec<Msg>>, TransportError> {
        let report = self.api.parse_status(&self.document_id).await?;
        let Some(parse_status) = ParseStatus::from_server(&report.status) else {
            kb_debug!(
                "Unrecognized parse status '{}' for {}",
                report.status,
                self.document_id
            );
            return Ok(Observation {
                status: TaskStatus::Running,
                report: Vec::new(),
            });
        };
        Ok(Observation {
            status: parse_status.task_status(),
            report: vec![Msg::ParseStatusObserved {
                document_id: self.document_id.clone(),
                status: parse_status,
            }],
        })
    }

    async fn stop(&self, wire_id: &TaskId) -> Result<(), TransportError> {
        self.api.stop(wire_id).await
    }
}

pub struct VectorizeProbe {
    api: Arc<dyn KnowledgeApi>,
    document_id: String,
}

impl VectorizeProbe {
    pub fn new(api: Arc<dyn KnowledgeApi>, document_id: impl Into<String>) -> Self {
        Self {
            api,
            document_id: document_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl TaskProbe for VectorizeProbe {
    type Report = Vec<Msg>;

    async fn observe(&self) -> Result<Observation<Vec<Msg>>, TransportError> {
        let report = self.api.vectorize_status(&self.document_id).await?;
        let status = TaskStatus::from_server(&report.status).unwrap_or(TaskStatus::Running);
        Ok(Observation {
            status,
            report: vec![Msg::VectorizeStatusObserved {
                document_id: self.document_id.clone(),
                status: report.status,
                chunked: report.chunked,
                chunk_count: report.chunk_count,
            }],
        })
    }

    async fn stop(&self, wire_id: &TaskId) -> Result<(), TransportError> {
        self.api.stop(wire_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStage {
    Parse,
    Vectorize,
}

/// Watches a folder-wide job through the folder's document listing.
///
/// A batch parse has settled once no document is pending or parsing; a
/// batch vectorize once every parsed document reports a terminal
/// vectorization status.
pub struct FolderProbe {
    api: Arc<dyn KnowledgeApi>,
    folder_id: String,
    stage: FolderStage,
}

impl FolderProbe {
    pub fn new(api: Arc<dyn KnowledgeApi>, folder_id: impl Into<String>, stage: FolderStage) -> Self {
        Self {
            api,
            folder_id: folder_id.into(),
            stage,
        }
    }

    pub fn settled(stage: FolderStage, documents: &[Document]) -> bool {
        match stage {
            FolderStage::Parse => documents.iter().all(|doc| {
                !matches!(doc.parse_status, ParseStatus::Pending | ParseStatus::Parsing)
            }),
            FolderStage::Vectorize => documents
                .iter()
                .filter(|doc| doc.parse_status == ParseStatus::Success)
                .all(|doc| doc.vectorize_task_status().is_some_and(TaskStatus::is_terminal)),
        }
    }
}

#[async_trait::async_trait]
impl TaskProbe for FolderProbe {
    type Report = Vec<Msg>;

    async fn observe(&self) -> Result<Observation<Vec<Msg>>, TransportError> {
        let listing = self.api.list_folder(&self.folder_id).await?;
        let status = if Self::settled(self.stage, &listing.documents) {
            TaskStatus::Success
        } else {
            TaskStatus::Running
        };
        Ok(Observation {
            status,
            report: vec![Msg::DocumentsLoaded(listing.documents)],
        })
    }

    async fn stop(&self, wire_id: &TaskId) -> Result<(), TransportError> {
        self.api.stop(wire_id).await
    }
}
