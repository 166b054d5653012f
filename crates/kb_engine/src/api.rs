use std::time::Duration;

use futures_util::StreamExt;
use kb_core::{Conversation, Document, DocumentProject, OutlineNode, TaskId};
use kb_logging::{kb_debug, kb_trace};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::wire::{
    AskBody, AskResponse, BatchAccepted, BatchParseMode, BatchVectorizeMode, ChunkReport,
    CreateProjectBody, DocumentList, ErrorBody, GenerateBody, GeneratedParagraph, ModeBody,
    OutlineBody, ParagraphEditBody, ParseStatusReport, ProjectList, RestoreBody, StopBody,
    TaskAccepted, TopicBody, VectorizeStatusReport,
};
use crate::{FailureKind, TransportError};

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Starting a vectorization blocks until the server has queued the work.
    pub vectorize_timeout: Duration,
    /// Outline and content generation, and chat answers.
    pub generation_timeout: Duration,
    pub max_export_bytes: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            vectorize_timeout: Duration::from_secs(300),
            generation_timeout: Duration::from_secs(120),
            max_export_bytes: 50 * 1024 * 1024,
        }
    }
}

/// The knowledge-base service as seen by the client.
///
/// Every call either returns the decoded response or a [`TransportError`];
/// an empty result is never substituted for a failure.
#[async_trait::async_trait]
pub trait KnowledgeApi: Send + Sync {
    async fn start_parse(&self, document_id: &str) -> Result<TaskAccepted, TransportError>;
    async fn parse_status(&self, document_id: &str) -> Result<ParseStatusReport, TransportError>;
    async fn chunk(&self, document_id: &str) -> Result<ChunkReport, TransportError>;
    async fn start_vectorize(&self, document_id: &str) -> Result<TaskAccepted, TransportError>;
    async fn vectorize_status(
        &self,
        document_id: &str,
    ) -> Result<VectorizeStatusReport, TransportError>;
    async fn get_document(&self, document_id: &str) -> Result<Document, TransportError>;
    async fn list_folder(&self, folder_id: &str) -> Result<DocumentList, TransportError>;
    async fn batch_parse(
        &self,
        folder_id: &str,
        mode: BatchParseMode,
    ) -> Result<BatchAccepted, TransportError>;
    async fn batch_vectorize(
        &self,
        folder_id: &str,
        mode: BatchVectorizeMode,
    ) -> Result<BatchAccepted, TransportError>;
    async fn ask(&self, body: &AskBody) -> Result<AskResponse, TransportError>;
    /// Best-effort cancellation. The service acknowledges unknown and
    /// finished ids as well.
    async fn stop(&self, task_id: &TaskId) -> Result<(), TransportError>;
    async fn get_conversation(&self, conversation_id: &str)
        -> Result<Conversation, TransportError>;
    async fn create_project(
        &self,
        title: &str,
        folder_ids: &[String],
    ) -> Result<DocumentProject, TransportError>;
    async fn list_projects(&self, skip: usize, limit: usize)
        -> Result<ProjectList, TransportError>;
    async fn get_project(&self, project_id: &str) -> Result<DocumentProject, TransportError>;
    async fn update_outline(
        &self,
        project_id: &str,
        outline: &[OutlineNode],
        locked: bool,
    ) -> Result<DocumentProject, TransportError>;
    async fn generate_outline(
        &self,
        project_id: &str,
        topic: &str,
    ) -> Result<DocumentProject, TransportError>;
    async fn generate_content(
        &self,
        project_id: &str,
        body: &GenerateBody,
    ) -> Result<GeneratedParagraph, TransportError>;
    async fn regenerate_paragraph(
        &self,
        project_id: &str,
        body: &GenerateBody,
    ) -> Result<GeneratedParagraph, TransportError>;
    async fn update_paragraph(
        &self,
        project_id: &str,
        section_id: &str,
        paragraph_id: &str,
        content: &str,
    ) -> Result<(), TransportError>;
    async fn restore_paragraph_version(
        &self,
        project_id: &str,
        section_id: &str,
        paragraph_id: &str,
        version_index: usize,
    ) -> Result<(), TransportError>;
    /// Raw `.docx` bytes, bounded by the configured export limit.
    async fn export_word(&self, project_id: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApi {
    settings: ApiSettings,
    base: Url,
    client: reqwest::Client,
}

impl ReqwestApi {
    pub fn new(settings: ApiSettings) -> Result<Self, TransportError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| TransportError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::new(
                FailureKind::InvalidUrl,
                format!("{} cannot be used as a base url", settings.base_url),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            base,
            client,
        })
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    /// Appends percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                TransportError::new(FailureKind::InvalidUrl, "base url cannot carry a path")
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn with_json<B: Serialize>(
        builder: RequestBuilder,
        body: &B,
    ) -> Result<RequestBuilder, TransportError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| TransportError::new(FailureKind::InvalidBody, err.to_string()))?;
        Ok(builder.header(CONTENT_TYPE, "application/json").body(bytes))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        kb_trace!("{} {}", status.as_u16(), response.url());
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| status.to_string());
        Err(TransportError::new(
            FailureKind::HttpStatus(status.as_u16()),
            message,
        ))
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, TransportError> {
        let response = Self::send(builder).await?;
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&body)
            .map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, TransportError> {
        let url = self.endpoint(segments)?;
        Self::send_json(self.client.get(url)).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, TransportError> {
        let url = self.endpoint(segments)?;
        let mut builder = self.client.post(url);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self::send_json(Self::with_json(builder, body)?).await
    }

    async fn post_empty<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        timeout: Option<Duration>,
    ) -> Result<T, TransportError> {
        self.post_json(segments, &serde_json::json!({}), timeout)
            .await
    }
}

#[async_trait::async_trait]
impl KnowledgeApi for ReqwestApi {
    async fn start_parse(&self, document_id: &str) -> Result<TaskAccepted, TransportError> {
        self.post_empty(&["documents", document_id, "parse"], None)
            .await
    }

    async fn parse_status(&self, document_id: &str) -> Result<ParseStatusReport, TransportError> {
        self.get_json(&["documents", document_id, "parse", "status"])
            .await
    }

    async fn chunk(&self, document_id: &str) -> Result<ChunkReport, TransportError> {
        self.post_empty(&["documents", document_id, "chunk"], None)
            .await
    }

    async fn start_vectorize(&self, document_id: &str) -> Result<TaskAccepted, TransportError> {
        self.post_empty(
            &["documents", document_id, "vectorize"],
            Some(self.settings.vectorize_timeout),
        )
        .await
    }

    async fn vectorize_status(
        &self,
        document_id: &str,
    ) -> Result<VectorizeStatusReport, TransportError> {
        self.get_json(&["documents", document_id, "vectorize", "status"])
            .await
    }

    async fn get_document(&self, document_id: &str) -> Result<Document, TransportError> {
        self.get_json(&["documents", document_id]).await
    }

    async fn list_folder(&self, folder_id: &str) -> Result<DocumentList, TransportError> {
        let mut url = self.endpoint(&["documents"])?;
        url.query_pairs_mut().append_pair("folder", folder_id);
        Self::send_json(self.client.get(url)).await
    }

    async fn batch_parse(
        &self,
        folder_id: &str,
        mode: BatchParseMode,
    ) -> Result<BatchAccepted, TransportError> {
        self.post_json(
            &["documents", "folders", folder_id, "batch-parse"],
            &ModeBody { mode },
            None,
        )
        .await
    }

    async fn batch_vectorize(
        &self,
        folder_id: &str,
        mode: BatchVectorizeMode,
    ) -> Result<BatchAccepted, TransportError> {
        self.post_json(
            &["documents", "folders", folder_id, "batch-vectorize"],
            &ModeBody { mode },
            Some(self.settings.vectorize_timeout),
        )
        .await
    }

    async fn ask(&self, body: &AskBody) -> Result<AskResponse, TransportError> {
        self.post_json(
            &["chat", "ask"],
            body,
            Some(self.settings.generation_timeout),
        )
        .await
    }

    async fn stop(&self, task_id: &TaskId) -> Result<(), TransportError> {
        let url = self.endpoint(&["chat", "stop"])?;
        let builder = Self::with_json(
            self.client.post(url),
            &StopBody {
                task_id: task_id.as_str(),
            },
        )?;
        Self::send(builder).await?;
        kb_debug!("Stop acknowledged for {}", task_id);
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, TransportError> {
        self.get_json(&["chat", "conversations", conversation_id])
            .await
    }

    async fn create_project(
        &self,
        title: &str,
        folder_ids: &[String],
    ) -> Result<DocumentProject, TransportError> {
        self.post_json(
            &["document-projects"],
            &CreateProjectBody { title, folder_ids },
            None,
        )
        .await
    }

    async fn list_projects(
        &self,
        skip: usize,
        limit: usize,
    ) -> Result<ProjectList, TransportError> {
        let mut url = self.endpoint(&["document-projects"])?;
        url.query_pairs_mut()
            .append_pair("skip", &skip.to_string())
            .append_pair("limit", &limit.to_string());
        Self::send_json(self.client.get(url)).await
    }

    async fn get_project(&self, project_id: &str) -> Result<DocumentProject, TransportError> {
        self.get_json(&["document-projects", project_id]).await
    }

    async fn update_outline(
        &self,
        project_id: &str,
        outline: &[OutlineNode],
        locked: bool,
    ) -> Result<DocumentProject, TransportError> {
        let url = self.endpoint(&["document-projects", project_id, "outline"])?;
        let builder = Self::with_json(self.client.put(url), &OutlineBody { outline, locked })?;
        Self::send_json(builder).await
    }

    async fn generate_outline(
        &self,
        project_id: &str,
        topic: &str,
    ) -> Result<DocumentProject, TransportError> {
        self.post_json(
            &["document-projects", project_id, "generate-outline"],
            &TopicBody { topic },
            Some(self.settings.generation_timeout),
        )
        .await
    }

    async fn generate_content(
        &self,
        project_id: &str,
        body: &GenerateBody,
    ) -> Result<GeneratedParagraph, TransportError> {
        self.post_json(
            &["document-projects", project_id, "generate-content"],
            body,
            Some(self.settings.generation_timeout),
        )
        .await
    }

    async fn regenerate_paragraph(
        &self,
        project_id: &str,
        body: &GenerateBody,
    ) -> Result<GeneratedParagraph, TransportError> {
        self.post_json(
            &["document-projects", project_id, "regenerate-paragraph"],
            body,
            Some(self.settings.generation_timeout),
        )
        .await
    }

    async fn update_paragraph(
        &self,
        project_id: &str,
        section_id: &str,
        paragraph_id: &str,
        content: &str,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&["document-projects", project_id, "paragraph"])?;
        let builder = Self::with_json(
            self.client.put(url),
            &ParagraphEditBody {
                section_id,
                paragraph_id,
                content,
            },
        )?;
        Self::send(builder).await?;
        Ok(())
    }

    async fn restore_paragraph_version(
        &self,
        project_id: &str,
        section_id: &str,
        paragraph_id: &str,
        version_index: usize,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&["document-projects", project_id, "restore-paragraph-version"])?;
        let builder = Self::with_json(
            self.client.post(url),
            &RestoreBody {
                section_id,
                paragraph_id,
                version_index,
            },
        )?;
        Self::send(builder).await?;
        Ok(())
    }

    async fn export_word(&self, project_id: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.endpoint(&["document-projects", project_id, "export-word"])?;
        let response = Self::send(
            self.client
                .get(url)
                .timeout(self.settings.generation_timeout),
        )
        .await?;

        let max_bytes = self.settings.max_export_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(TransportError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "export too large",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(TransportError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "export too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        kb_debug!("Exported {} bytes for project {}", bytes.len(), project_id);
        Ok(bytes)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(FailureKind::Decode, err.to_string());
    }
    TransportError::new(FailureKind::Network, err.to_string())
}
