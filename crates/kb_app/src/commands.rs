// Subcommand dispatch. Every result observed from the service is merged into
// the session state through `kb_core::update` before it is printed.

use std::fs;
use std::future::Future;
use std::path::Path;

use anyhow::{bail, Context};
use kb_core::{
    sort_by_relevance, update, AppState, Change, Conversation, Document, DocumentProject, Msg,
    OutlineNode, Paragraph, Source, TaskId,
};
use kb_engine::{
    AskRequest, BatchOutcome, CancellationToken, ChatAnswer, ClientError, KbClient, TaskOutcome,
};
use kb_app::interrupt::until_interrupted;
use kb_logging::{kb_debug, kb_info, kb_warn};

use crate::cli::Command;

pub struct Session {
    pub client: KbClient,
    pub state: AppState,
    pub cancel: CancellationToken,
}

pub async fn run(session: &mut Session, command: Command) -> anyhow::Result<()> {
    let cancel = session.cancel.clone();
    match command {
        Command::Document { document_id } => {
            let msg = interruptible(&cancel, session.client.get_document(&document_id)).await?;
            session.apply(msg)?;
            print_document(session.document(&document_id)?);
        }
        Command::Documents { folder_id } => {
            let msg = interruptible(&cancel, session.client.list_folder(&folder_id)).await?;
            session.apply(msg)?;
            let mut count = 0;
            for document in session.state.documents_in_folder(&folder_id) {
                print_document(document);
                count += 1;
            }
            println!("{count} documents in folder {folder_id}");
        }
        Command::Parse { document_id } => {
            let outcome = session
                .client
                .parse_document(&document_id, &cancel)
                .await?;
            session.finish(outcome)?;
            print_document(session.document(&document_id)?);
        }
        Command::Chunk { document_id } => {
            let document = session.refresh_document(&document_id).await?;
            let msg = interruptible(&cancel, session.client.chunk_document(&document)).await?;
            session.apply(msg)?;
            print_document(session.document(&document_id)?);
        }
        Command::Vectorize { document_id } => {
            let document = session.refresh_document(&document_id).await?;
            let outcome = session
                .client
                .vectorize_document(&document, &cancel)
                .await?;
            session.finish(outcome)?;
            print_document(session.document(&document_id)?);
        }
        Command::BatchParse { folder_id, mode } => {
            let batch = session
                .client
                .batch_parse(&folder_id, mode, &cancel)
                .await?;
            session.finish_batch(batch)?;
        }
        Command::BatchVectorize { folder_id, mode } => {
            let batch = session
                .client
                .batch_vectorize(&folder_id, mode, &cancel)
                .await?;
            session.finish_batch(batch)?;
        }
        Command::Ask {
            question,
            folder,
            conversation,
        } => {
            let mut request = AskRequest::new(question);
            if let Some(folder_id) = folder {
                request = request.in_folder(folder_id);
            }
            if let Some(conversation_id) = conversation {
                if session.state.conversation(&conversation_id).is_none() {
                    let msg = interruptible(
                        &cancel,
                        session.client.load_conversation(&conversation_id),
                    )
                    .await?;
                    session.apply(msg)?;
                }
                request = request.in_conversation(conversation_id);
            }
            session.ask(request).await?;
        }
        Command::Stop { task_id } => {
            let task_id = TaskId::new(task_id.as_str());
            interruptible(&cancel, session.client.api().stop(&task_id)).await?;
            println!("Stop sent for task {task_id}");
        }
        Command::Conversation { conversation_id } => {
            let msg = interruptible(&cancel, session.client.load_conversation(&conversation_id))
                .await?;
            session.apply(msg)?;
            let conversation = session
                .state
                .conversation(&conversation_id)
                .with_context(|| format!("conversation {conversation_id} missing after load"))?;
            print_conversation(conversation);
        }
        Command::Conversations => {
            for conversation in session.state.conversations() {
                println!(
                    "{}  {}  ({} messages, updated {})",
                    conversation.id,
                    conversation.title,
                    conversation.messages.len(),
                    conversation.updated_at
                );
            }
        }
        Command::CreateProject { title, folder } => {
            let msg = interruptible(&cancel, session.client.create_project(&title, &folder)).await?;
            let changes = session.apply(msg)?;
            for change in changes {
                if let Change::ProjectUpdated { project_id } = change {
                    print_project(session.project_ref(&project_id)?);
                }
            }
        }
        Command::Projects { skip, limit } => {
            let page = interruptible(&cancel, session.client.list_projects(skip, limit)).await?;
            let total = page.total;
            let shown = page.projects.len();
            for msg in page.into_msgs() {
                let changes = session.apply(msg)?;
                for change in changes {
                    if let Change::ProjectUpdated { project_id } = change {
                        let project = session.project_ref(&project_id)?;
                        println!(
                            "{}  {}  ({} sections)",
                            project.id,
                            project.title,
                            project.outline().len()
                        );
                    }
                }
            }
            println!("{shown} of {total} projects from {skip}");
        }
        Command::Project { project_id } => {
            let msg = interruptible(&cancel, session.client.load_project(&project_id)).await?;
            session.apply(msg)?;
            print_project(session.project_ref(&project_id)?);
        }
        Command::GenerateOutline { project_id, topic } => {
            let project = session.project(&project_id).await?;
            let outcome = session
                .client
                .generate_outline(&project, &topic, &cancel)
                .await?;
            session.finish(outcome)?;
            print_project(session.project_ref(&project_id)?);
        }
        Command::SaveOutline {
            project_id,
            file,
            lock,
        } => {
            let outline = read_outline(&file)?;
            let project = session.project(&project_id).await?;
            let msg =
                interruptible(&cancel, session.client.save_outline(&project, outline, lock)).await?;
            session.apply(msg)?;
            print_project(session.project_ref(&project_id)?);
        }
        Command::Lock { project_id, unlock } => {
            let project = session.project(&project_id).await?;
            let msg = interruptible(&cancel, session.client.set_outline_locked(&project, !unlock))
                .await?;
            session.apply(msg)?;
            let locked = session.project_ref(&project_id)?.outline().is_locked();
            println!(
                "Outline of {project_id} is {}",
                if locked { "locked" } else { "unlocked" }
            );
        }
        Command::GenerateContent {
            project_id,
            section_id,
        } => {
            let project = session.project(&project_id).await?;
            let outcome = session
                .client
                .generate_content(&project, &section_id, &cancel)
                .await?;
            session.finish(outcome)?;
            print_section(session.project_ref(&project_id)?, &section_id);
        }
        Command::Regenerate {
            project_id,
            section_id,
            paragraph_id,
            prompt,
        } => {
            let project = session.project(&project_id).await?;
            let outcome = session
                .client
                .regenerate_paragraph(
                    &project,
                    &section_id,
                    &paragraph_id,
                    prompt.as_deref(),
                    &cancel,
                )
                .await?;
            let current_id = outcome
                .msgs
                .iter()
                .find_map(|msg| match msg {
                    Msg::ParagraphRegenerated {
                        server_paragraph_id: Some(id),
                        ..
                    } => Some(id.clone()),
                    _ => None,
                })
                .unwrap_or(paragraph_id);
            session.finish(outcome)?;
            let project = session.project_ref(&project_id)?;
            print_paragraph(paragraph(project, &section_id, &current_id)?);
        }
        Command::EditParagraph {
            project_id,
            section_id,
            paragraph_id,
            content,
        } => {
            let project = session.project(&project_id).await?;
            let msg = interruptible(
                &cancel,
                session
                    .client
                    .edit_paragraph(&project, &section_id, &paragraph_id, &content),
            )
            .await?;
            session.apply(msg)?;
            let project = session.project_ref(&project_id)?;
            print_paragraph(paragraph(project, &section_id, &paragraph_id)?);
        }
        Command::History {
            project_id,
            section_id,
            paragraph_id,
        } => {
            let project = session.project(&project_id).await?;
            let paragraph = paragraph(&project, &section_id, &paragraph_id)?;
            if paragraph.versions.is_empty() {
                println!("No earlier versions of {paragraph_id}");
            }
            for (index, version) in paragraph.versions.iter().enumerate() {
                println!("[{index}] {}", version.timestamp);
                println!("    {}", version.content);
            }
            println!("current {}", paragraph.timestamp);
            println!("    {}", paragraph.content);
        }
        Command::Restore {
            project_id,
            section_id,
            paragraph_id,
            version_index,
        } => {
            let project = session.project(&project_id).await?;
            let msg = interruptible(
                &cancel,
                session.client.restore_paragraph_version(
                    &project,
                    &section_id,
                    &paragraph_id,
                    version_index,
                ),
            )
            .await?;
            session.apply(msg)?;
            let project = session.project_ref(&project_id)?;
            print_paragraph(paragraph(project, &section_id, &paragraph_id)?);
        }
        Command::Export { project_id, out } => {
            let project = session.project(&project_id).await?;
            let path = interruptible(&cancel, session.client.export_word(&project, &out)).await?;
            println!("Exported to {}", path.display());
        }
    }
    Ok(())
}

/// Awaits a service call, giving up on Ctrl-C.
async fn interruptible<T, E, F>(cancel: &CancellationToken, call: F) -> anyhow::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    Ok(until_interrupted(cancel, call).await??)
}

impl Session {
    fn apply(&mut self, msg: Msg) -> anyhow::Result<Vec<Change>> {
        let changes = update(&mut self.state, msg)?;
        for change in &changes {
            kb_debug!("State change: {:?}", change);
        }
        Ok(changes)
    }

    /// Merges what the task observed, including the observations of a task
    /// that ended in error, then reports a non-success status as a failure.
    fn finish(&mut self, outcome: TaskOutcome) -> anyhow::Result<()> {
        let checked = outcome.check();
        let TaskOutcome {
            handle,
            status,
            msgs,
        } = outcome;
        for msg in msgs {
            self.apply(msg)?;
        }
        println!("{} of {}: {}", handle.kind, handle.target, status);
        checked?;
        Ok(())
    }

    fn finish_batch(&mut self, batch: BatchOutcome) -> anyhow::Result<()> {
        let accepted = &batch.accepted;
        println!(
            "{} documents, {} already done, {} queued",
            accepted.total_count, accepted.already_done, accepted.pending
        );
        if let Some(message) = &accepted.message {
            println!("{message}");
        }
        self.finish(batch.outcome)
    }

    fn document(&self, document_id: &str) -> anyhow::Result<&Document> {
        self.state
            .document(document_id)
            .with_context(|| format!("document {document_id} is not known"))
    }

    /// Stage preconditions are checked against the server's current view.
    async fn refresh_document(&mut self, document_id: &str) -> anyhow::Result<Document> {
        let msg = interruptible(&self.cancel, self.client.get_document(document_id)).await?;
        self.apply(msg)?;
        Ok(self.document(document_id)?.clone())
    }

    /// The session copy of a project, fetched from the service on first use.
    async fn project(&mut self, project_id: &str) -> anyhow::Result<DocumentProject> {
        if self.state.project(project_id).is_none() {
            let msg = interruptible(&self.cancel, self.client.load_project(project_id)).await?;
            self.apply(msg)?;
        }
        Ok(self.project_ref(project_id)?.clone())
    }

    fn project_ref(&self, project_id: &str) -> anyhow::Result<&DocumentProject> {
        self.state
            .project(project_id)
            .with_context(|| format!("project {project_id} is not known"))
    }

    async fn ask(&mut self, request: AskRequest) -> anyhow::Result<()> {
        let chat = self.client.chat();
        let pending = chat.ask(request)?;
        let task_id = pending.task_id().clone();
        let wait = pending.wait();
        tokio::pin!(wait);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let status = chat.stop(&task_id).await?;
                kb_info!("Ask {} ended as {} after interrupt", task_id, status);
                wait.await
            }
            result = &mut wait => result,
        };

        match result {
            Ok(answer) => self.record_answer(answer),
            Err(ClientError::Stopped { .. }) => {
                println!("Stopped. No answer was recorded.");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_answer(&mut self, answer: ChatAnswer) -> anyhow::Result<()> {
        let mut sources = answer.sources.clone();
        let changes = self.apply(answer.into_msg())?;
        for change in changes {
            if let Change::ConversationUpdated {
                conversation_id,
                created,
            } = change
            {
                if created {
                    println!("New conversation {conversation_id}");
                }
                if let Some(message) = self
                    .state
                    .conversation(&conversation_id)
                    .and_then(|conversation| conversation.messages.last())
                {
                    println!("{}", message.content);
                }
            }
        }
        sort_by_relevance(&mut sources);
        print_sources(&sources);
        Ok(())
    }
}

fn read_outline(path: &Path) -> anyhow::Result<Vec<OutlineNode>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read outline file {}", path.display()))?;
    let outline: Vec<OutlineNode> = ron::from_str(&text)
        .with_context(|| format!("invalid outline in {}", path.display()))?;
    if outline.is_empty() {
        bail!("outline file {} holds no sections", path.display());
    }
    Ok(outline)
}

fn paragraph<'a>(
    project: &'a DocumentProject,
    section_id: &str,
    paragraph_id: &str,
) -> anyhow::Result<&'a Paragraph> {
    project
        .sections()
        .paragraph(section_id, paragraph_id)
        .with_context(|| format!("paragraph {paragraph_id} not found in section {section_id}"))
}

fn print_document(document: &Document) {
    let vectorize = document.vectorize_status.as_deref().unwrap_or("-");
    println!(
        "{}  {}  parse={:?} chunked={} chunks={} vectorize={}",
        document.id,
        document.title,
        document.parse_status,
        document.chunked,
        document
            .chunk_count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string()),
        vectorize
    );
    if let Some(message) = &document.error_message {
        kb_warn!("Document {} reports: {}", document.id, message);
        println!("    error: {message}");
    }
}

fn print_conversation(conversation: &Conversation) {
    println!("{}  {}", conversation.id, conversation.title);
    for message in &conversation.messages {
        println!("[{:?}] {}", message.role, message.content);
    }
}

fn print_sources(sources: &[Source]) {
    for source in sources {
        let name = source
            .document_name
            .as_deref()
            .or(source.title.as_deref())
            .unwrap_or(source.document_id.as_str());
        println!("  - {name} (score {:.3})", source.score);
    }
}

fn print_project(project: &DocumentProject) {
    let outline = project.outline();
    println!(
        "{}  {}  ({} sections{})",
        project.id,
        project.title,
        outline.len(),
        if outline.is_locked() { ", locked" } else { "" }
    );
    print_nodes(project, outline.roots(), 1);
}

fn print_nodes(project: &DocumentProject, nodes: &[OutlineNode], depth: usize) {
    for node in nodes {
        let paragraphs = project
            .sections()
            .section(&node.id)
            .map(|section| section.paragraphs.len())
            .unwrap_or(0);
        println!(
            "{}{} {} [{} paragraphs]",
            "  ".repeat(depth),
            node.id,
            node.label,
            paragraphs
        );
        print_nodes(project, &node.children, depth + 1);
    }
}

fn print_section(project: &DocumentProject, section_id: &str) {
    let Some(section) = project.sections().section(section_id) else {
        println!("Section {section_id} has no content");
        return;
    };
    for paragraph in &section.paragraphs {
        print_paragraph(paragraph);
    }
    print_sources(&section.sources);
}

fn print_paragraph(paragraph: &Paragraph) {
    println!(
        "{} ({} earlier versions, {})",
        paragraph.id,
        paragraph.versions.len(),
        paragraph.timestamp
    );
    println!("    {}", paragraph.content);
}
