//! The client context object.
//!
//! `KbClient` owns the connection to the service and the task registry for
//! one session. Operations never touch [`kb_core::AppState`] directly: they
//! return the [`Msg`]s the caller merges with [`kb_core::update`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kb_core::{
    CoreError, Document, DocumentProject, Msg, OutlineNode, TaskHandle, TaskId, TaskKind,
    TaskStatus,
};
use kb_logging::{kb_info, kb_warn};
use tokio_util::sync::CancellationToken;

use crate::filename::export_filename;
use crate::poll::{PollSettings, PollingSession};
use crate::probes::{FolderProbe, FolderStage, MsgProbe, ParseProbe, VectorizeProbe};
use crate::tracker::{shared_tracker, stop_with, SharedTracker, StopSignals};
use crate::wire::{BatchAccepted, BatchParseMode, BatchVectorizeMode, GenerateBody, ProjectList};
use crate::{
    ApiSettings, AtomicFileWriter, ChatSession, ClientError, KnowledgeApi, ReqwestApi,
    TransportError,
};

/// Terminal result of a tracked task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub handle: TaskHandle,
    pub status: TaskStatus,
    /// Observations to merge, also present when the task ended in error.
    pub msgs: Vec<Msg>,
}

impl TaskOutcome {
    /// `Ok` only when the task succeeded.
    pub fn check(&self) -> Result<(), ClientError> {
        match self.status {
            TaskStatus::Success => Ok(()),
            TaskStatus::Stopped => Err(ClientError::Stopped {
                task_id: self.handle.id.clone(),
            }),
            other => Err(ClientError::TaskFailed {
                task_id: self.handle.id.clone(),
                message: format!(
                    "{} of {} ended with status {}",
                    self.handle.kind, self.handle.target, other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub accepted: BatchAccepted,
    pub outcome: TaskOutcome,
}

#[derive(Clone)]
pub struct KbClient {
    api: Arc<dyn KnowledgeApi>,
    tracker: SharedTracker,
    signals: StopSignals,
    poll: PollSettings,
}

impl KbClient {
    pub fn new(api: Arc<dyn KnowledgeApi>, poll: PollSettings) -> Self {
        Self {
            api,
            tracker: shared_tracker(),
            signals: StopSignals::new(),
            poll,
        }
    }

    pub fn connect(settings: ApiSettings, poll: PollSettings) -> Result<Self, TransportError> {
        let api = ReqwestApi::new(settings)?;
        Ok(Self::new(Arc::new(api), poll))
    }

    pub fn api(&self) -> &Arc<dyn KnowledgeApi> {
        &self.api
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    pub fn chat(&self) -> ChatSession {
        ChatSession::new(
            Arc::clone(&self.api),
            Arc::clone(&self.tracker),
            self.signals.clone(),
        )
    }

    pub async fn parse_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        let handle = self.tracker.lock().start(TaskKind::Parse, document_id)?;
        let accepted = self
            .start_call(&handle, self.api.start_parse(document_id))
            .await?;
        self.attach_server_id(&handle, accepted.task_id);
        self.watch(&handle, cancel).await
    }

    /// Chunks a parsed document. Runs synchronously on the server.
    pub async fn chunk_document(&self, document: &Document) -> Result<Msg, ClientError> {
        document.ensure_can_chunk()?;
        let report = self.api.chunk(&document.id).await?;
        kb_info!(
            "Document {} chunked into {} chunks",
            document.id,
            report.chunk_count
        );
        Ok(Msg::ChunkCompleted {
            document_id: document.id.clone(),
            chunk_count: report.chunk_count,
        })
    }

    pub async fn vectorize_document(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        document.ensure_can_vectorize()?;
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::Vectorize, document.id.as_str())?;
        let accepted = self
            .start_call(&handle, self.api.start_vectorize(&document.id))
            .await?;
        self.attach_server_id(&handle, accepted.task_id);
        self.watch(&handle, cancel).await
    }

    pub async fn batch_parse(
        &self,
        folder_id: &str,
        mode: BatchParseMode,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ClientError> {
        let handle = self.tracker.lock().start(TaskKind::BatchParse, folder_id)?;
        let accepted = self
            .start_call(&handle, self.api.batch_parse(folder_id, mode))
            .await?;
        kb_info!(
            "Batch parse ({}) of folder {}: {} documents, {} pending",
            mode,
            folder_id,
            accepted.total_count,
            accepted.pending
        );
        self.attach_server_id(&handle, accepted.task_id.clone());
        let outcome = self.watch(&handle, cancel).await?;
        Ok(BatchOutcome { accepted, outcome })
    }

    pub async fn batch_vectorize(
        &self,
        folder_id: &str,
        mode: BatchVectorizeMode,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, ClientError> {
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::BatchVectorize, folder_id)?;
        let accepted = self
            .start_call(&handle, self.api.batch_vectorize(folder_id, mode))
            .await?;
        kb_info!(
            "Batch vectorize ({}) of folder {}: {} documents, {} pending",
            mode,
            folder_id,
            accepted.total_count,
            accepted.pending
        );
        self.attach_server_id(&handle, accepted.task_id.clone());
        let outcome = self.watch(&handle, cancel).await?;
        Ok(BatchOutcome { accepted, outcome })
    }

    /// Polls a registered task to a terminal status with a fresh session.
    /// Also used to resume a task whose previous session timed out.
    pub async fn watch(
        &self,
        handle: &TaskHandle,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        let api = Arc::clone(&self.api);
        let target = handle.target.clone();
        let probe: Box<MsgProbe> = match handle.kind {
            TaskKind::Parse => Box::new(ParseProbe::new(api, target)),
            TaskKind::Vectorize => Box::new(VectorizeProbe::new(api, target)),
            TaskKind::BatchParse => Box::new(FolderProbe::new(api, target, FolderStage::Parse)),
            TaskKind::BatchVectorize => {
                Box::new(FolderProbe::new(api, target, FolderStage::Vectorize))
            }
            kind => return Err(ClientError::NotPollable { kind }),
        };

        let session = PollingSession::new(self.poll.clone(), Arc::clone(&self.tracker));
        let result = session.run(&handle.id, probe.as_ref(), cancel).await;
        self.tracker.lock().reap(&handle.id);
        let outcome = result?;
        if outcome.status != TaskStatus::Success {
            kb_warn!(
                "{} of {} ended with {}",
                handle.kind,
                handle.target,
                outcome.status
            );
        }
        Ok(TaskOutcome {
            handle: handle.clone(),
            status: outcome.status,
            msgs: outcome.report,
        })
    }

    /// Best-effort stop of any registered task.
    pub async fn stop(&self, task_id: &TaskId) -> Result<TaskStatus, ClientError> {
        let api = Arc::clone(&self.api);
        let status = stop_with(&self.tracker, task_id, |wire_id| async move {
            api.stop(&wire_id).await
        })
        .await?;
        if status == TaskStatus::Stopped {
            self.signals.fire(task_id);
        }
        Ok(status)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Msg, ClientError> {
        let document = self.api.get_document(document_id).await?;
        Ok(Msg::DocumentsLoaded(vec![document]))
    }

    pub async fn list_folder(&self, folder_id: &str) -> Result<Msg, ClientError> {
        let listing = self.api.list_folder(folder_id).await?;
        Ok(Msg::DocumentsLoaded(listing.documents))
    }

    pub async fn load_conversation(&self, conversation_id: &str) -> Result<Msg, ClientError> {
        let conversation = self.api.get_conversation(conversation_id).await?;
        Ok(Msg::ConversationLoaded(conversation))
    }

    pub async fn load_project(&self, project_id: &str) -> Result<Msg, ClientError> {
        let project = self.api.get_project(project_id).await?;
        Ok(Msg::ProjectLoaded(project))
    }

    pub async fn create_project(
        &self,
        title: &str,
        folder_ids: &[String],
    ) -> Result<Msg, ClientError> {
        let project = self.api.create_project(title, folder_ids).await?;
        kb_info!("Created project {} ({})", project.id, project.title);
        Ok(Msg::ProjectLoaded(project))
    }

    /// One page of the server's projects. Merge them with
    /// [`ProjectList::into_msgs`].
    pub async fn list_projects(
        &self,
        skip: usize,
        limit: usize,
    ) -> Result<ProjectList, ClientError> {
        Ok(self.api.list_projects(skip, limit).await?)
    }

    /// Sends an edited outline, locking it afterwards when `lock` is set.
    /// The edit is validated locally first, and a locked outline is refused
    /// before anything is sent; unlock it with [`Self::set_outline_locked`].
    pub async fn save_outline(
        &self,
        project: &DocumentProject,
        outline: Vec<OutlineNode>,
        lock: bool,
    ) -> Result<Msg, ClientError> {
        let mut draft = project.outline().clone();
        draft.replace(outline)?;
        let updated = self
            .api
            .update_outline(&project.id, draft.roots(), lock)
            .await?;
        Ok(Msg::ProjectLoaded(updated))
    }

    /// Locks or unlocks the outline without changing its structure. Asking
    /// for the state it is already in sends nothing.
    pub async fn set_outline_locked(
        &self,
        project: &DocumentProject,
        locked: bool,
    ) -> Result<Msg, ClientError> {
        let outline = project.outline();
        if outline.is_locked() != locked {
            let updated = self
                .api
                .update_outline(&project.id, outline.roots(), locked)
                .await?;
            return Ok(Msg::ProjectLoaded(updated));
        }
        kb_info!(
            "Outline of {} already {}",
            project.id,
            if locked { "locked" } else { "unlocked" }
        );
        Ok(Msg::OutlineLockChanged {
            project_id: project.id.clone(),
            locked,
        })
    }

    pub async fn generate_outline(
        &self,
        project: &DocumentProject,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        if project.outline().is_locked() {
            return Err(CoreError::OutlineLocked.into());
        }
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::OutlineGenerate, project.id.as_str())?;
        let updated = self
            .one_shot(&handle, self.api.generate_outline(&project.id, topic), cancel)
            .await?;
        Ok(TaskOutcome {
            handle,
            status: TaskStatus::Success,
            msgs: vec![Msg::ProjectLoaded(updated)],
        })
    }

    pub async fn generate_content(
        &self,
        project: &DocumentProject,
        section_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        let body = generate_body(project, section_id, None)?;
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::ContentGenerate, section_key(project, section_id))?;
        let generated = self
            .one_shot(&handle, self.api.generate_content(&project.id, &body), cancel)
            .await?;
        Ok(TaskOutcome {
            handle,
            status: TaskStatus::Success,
            msgs: vec![Msg::ContentGenerated {
                project_id: project.id.clone(),
                section_id: section_id.to_string(),
                paragraph_id: generated.paragraph_id,
                timestamp: generated.timestamp,
                content: generated.content,
                sources: generated.sources,
            }],
        })
    }

    /// Regenerates an existing paragraph. The previous content moves into
    /// its history, and the paragraph takes the new id if the server issued
    /// one.
    pub async fn regenerate_paragraph(
        &self,
        project: &DocumentProject,
        section_id: &str,
        paragraph_id: &str,
        custom_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, ClientError> {
        require_paragraph(project, section_id, paragraph_id)?;
        let body = generate_body(project, section_id, custom_prompt)?;
        let handle = self
            .tracker
            .lock()
            .start(TaskKind::ContentGenerate, section_key(project, section_id))?;
        let generated = self
            .one_shot(
                &handle,
                self.api.regenerate_paragraph(&project.id, &body),
                cancel,
            )
            .await?;
        Ok(TaskOutcome {
            handle,
            status: TaskStatus::Success,
            msgs: vec![Msg::ParagraphRegenerated {
                project_id: project.id.clone(),
                section_id: section_id.to_string(),
                paragraph_id: paragraph_id.to_string(),
                server_paragraph_id: generated.paragraph_id,
                content: generated.content,
                sources: Some(generated.sources),
            }],
        })
    }

    /// Hand edit of a paragraph. No history entry is created.
    pub async fn edit_paragraph(
        &self,
        project: &DocumentProject,
        section_id: &str,
        paragraph_id: &str,
        content: &str,
    ) -> Result<Msg, ClientError> {
        require_paragraph(project, section_id, paragraph_id)?;
        self.api
            .update_paragraph(&project.id, section_id, paragraph_id, content)
            .await?;
        Ok(Msg::ParagraphEdited {
            project_id: project.id.clone(),
            section_id: section_id.to_string(),
            paragraph_id: paragraph_id.to_string(),
            content: content.to_string(),
        })
    }

    /// Restores a history entry. Out-of-range indexes are rejected before
    /// anything is sent.
    pub async fn restore_paragraph_version(
        &self,
        project: &DocumentProject,
        section_id: &str,
        paragraph_id: &str,
        version_index: usize,
    ) -> Result<Msg, ClientError> {
        let len = require_paragraph(project, section_id, paragraph_id)?
            .versions
            .len();
        if version_index >= len {
            return Err(CoreError::IndexOutOfRange {
                index: version_index,
                len,
            }
            .into());
        }
        self.api
            .restore_paragraph_version(&project.id, section_id, paragraph_id, version_index)
            .await?;
        Ok(Msg::ParagraphRestored {
            project_id: project.id.clone(),
            section_id: section_id.to_string(),
            paragraph_id: paragraph_id.to_string(),
            version_index,
        })
    }

    /// Downloads the Word rendering of a project into `dir`.
    pub async fn export_word(
        &self,
        project: &DocumentProject,
        dir: &Path,
    ) -> Result<PathBuf, ClientError> {
        let bytes = self.api.export_word(&project.id).await?;
        let writer = AtomicFileWriter::new(dir.to_path_buf());
        let path = writer.write(&export_filename(&project.title, &project.id), &bytes)?;
        kb_info!("Exported project {} to {}", project.id, path.display());
        Ok(path)
    }

    /// Start calls are never retried. A failed start ends the task.
    async fn start_call<T, F>(&self, handle: &TaskHandle, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match call.await {
            Ok(accepted) => {
                self.tracker.lock().record(&handle.id, TaskStatus::Running)?;
                Ok(accepted)
            }
            Err(err) => {
                kb_warn!("Starting {} for {} failed: {}", handle.kind, handle.target, err);
                self.finish(handle, TaskStatus::Error);
                Err(err.into())
            }
        }
    }

    /// Runs a task whose result arrives with the response itself. When
    /// `cancel` fires first the response is abandoned, and the server is
    /// asked to stop the work.
    async fn one_shot<T, F>(
        &self,
        handle: &TaskHandle,
        call: F,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = call => Some(result),
        };
        let Some(result) = result else {
            return Err(self.abandon(handle).await);
        };
        let observed = if result.is_ok() {
            TaskStatus::Success
        } else {
            TaskStatus::Error
        };
        let status = self.finish(handle, observed);
        match (status, result) {
            (TaskStatus::Stopped, _) => Err(ClientError::Stopped {
                task_id: handle.id.clone(),
            }),
            (_, Ok(value)) => Ok(value),
            (_, Err(err)) => {
                kb_warn!("{} for {} failed: {}", handle.kind, handle.target, err);
                Err(err.into())
            }
        }
    }

    async fn abandon(&self, handle: &TaskHandle) -> ClientError {
        kb_info!("{} for {} cancelled", handle.kind, handle.target);
        if let Err(err) = self.stop(&handle.id).await {
            kb_warn!("Could not stop {} on the server: {}", handle.id, err);
        }
        self.finish(handle, TaskStatus::Stopped);
        ClientError::Cancelled {
            task_id: handle.id.clone(),
        }
    }

    /// Records a terminal status and reaps the task.
    fn finish(&self, handle: &TaskHandle, observed: TaskStatus) -> TaskStatus {
        let mut tracker = self.tracker.lock();
        let status = tracker.record(&handle.id, observed).unwrap_or(observed);
        tracker.reap(&handle.id);
        status
    }

    fn attach_server_id(&self, handle: &TaskHandle, server_id: Option<String>) {
        if let Some(server_id) = server_id {
            if server_id != handle.id.as_str() {
                if let Err(err) = self.tracker.lock().attach_server_id(&handle.id, server_id) {
                    kb_warn!("Could not attach server id to {}: {}", handle.id, err);
                }
            }
        }
    }
}

fn section_key(project: &DocumentProject, section_id: &str) -> String {
    format!("{}/{}", project.id, section_id)
}

fn generate_body(
    project: &DocumentProject,
    section_id: &str,
    custom_prompt: Option<&str>,
) -> Result<GenerateBody, CoreError> {
    let (section_title, context_sections) = project.generation_context(section_id)?;
    Ok(GenerateBody {
        section_id: section_id.to_string(),
        section_title,
        context_sections,
        custom_prompt: custom_prompt.unwrap_or_default().to_string(),
    })
}

fn require_paragraph<'a>(
    project: &'a DocumentProject,
    section_id: &str,
    paragraph_id: &str,
) -> Result<&'a kb_core::Paragraph, CoreError> {
    if project.sections().section(section_id).is_none() {
        return Err(CoreError::NotFound {
            what: "section",
            id: section_id.to_string(),
        });
    }
    project
        .sections()
        .paragraph(section_id, paragraph_id)
        .ok_or_else(|| CoreError::NotFound {
            what: "paragraph",
            id: paragraph_id.to_string(),
        })
}
