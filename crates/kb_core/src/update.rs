use kb_logging::{kb_debug, kb_info};

use crate::{AppState, Change, Conversation, CoreError, Document, DocumentProject, MessageRole, Msg};

const TITLE_CHARS: usize = 50;

/// Applies one observed result to the state and returns what changed.
///
/// A rejected message leaves the state exactly as it was.
pub fn update(state: &mut AppState, msg: Msg) -> Result<Vec<Change>, CoreError> {
    let changes = match msg {
        Msg::Restore(snapshot) => {
            let conversations = snapshot.conversations.len();
            let projects = snapshot.projects.len();
            for conversation in snapshot.conversations {
                state
                    .conversations
                    .insert(conversation.id.clone(), conversation);
            }
            for project in snapshot.projects {
                state.projects.insert(project.id.clone(), project);
            }
            kb_info!(
                "Restored {} conversations and {} projects",
                conversations,
                projects
            );
            vec![Change::SessionRestored {
                conversations,
                projects,
            }]
        }
        Msg::DocumentsLoaded(documents) => documents
            .into_iter()
            .map(|document| {
                let document_id = document.id.clone();
                state.documents.insert(document_id.clone(), document);
                Change::DocumentUpdated { document_id }
            })
            .collect(),
        Msg::ParseStatusObserved {
            document_id,
            status,
        } => {
            document_entry(state, &document_id).apply_parse_status(status);
            vec![Change::DocumentUpdated { document_id }]
        }
        Msg::ChunkCompleted {
            document_id,
            chunk_count,
        } => {
            document_entry(state, &document_id).apply_chunked(chunk_count);
            vec![Change::DocumentUpdated { document_id }]
        }
        Msg::VectorizeStatusObserved {
            document_id,
            status,
            chunked,
            chunk_count,
        } => {
            document_entry(state, &document_id).apply_vectorize_status(status, chunked, chunk_count);
            vec![Change::DocumentUpdated { document_id }]
        }
        Msg::AnswerReceived {
            conversation_id,
            folder_id,
            question,
            answer,
            sources,
        } => {
            let conversation_id =
                conversation_id.unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));
            let created = !state.conversations.contains_key(&conversation_id);
            let conversation = state
                .conversations
                .entry(conversation_id.clone())
                .or_insert_with(|| {
                    Conversation::new(conversation_id.clone(), title_from(&question), folder_id)
                });
            conversation.push_message(MessageRole::Assistant, answer, sources);
            kb_debug!(
                "Conversation {} now has {} messages",
                conversation_id,
                conversation.messages.len()
            );
            vec![Change::ConversationUpdated {
                conversation_id,
                created,
            }]
        }
        Msg::ConversationLoaded(conversation) => {
            let conversation_id = conversation.id.clone();
            let created = state
                .conversations
                .insert(conversation_id.clone(), conversation)
                .is_none();
            vec![Change::ConversationUpdated {
                conversation_id,
                created,
            }]
        }
        Msg::ProjectLoaded(project) => {
            let project_id = project.id.clone();
            state.projects.insert(project_id.clone(), project);
            vec![Change::ProjectUpdated { project_id }]
        }
        Msg::OutlineEdited {
            project_id,
            outline,
        } => {
            project_mut(state, &project_id)?.replace_outline(outline)?;
            vec![Change::ProjectUpdated { project_id }]
        }
        Msg::OutlineLockChanged { project_id, locked } => {
            project_mut(state, &project_id)?.set_outline_locked(locked);
            vec![Change::ProjectUpdated { project_id }]
        }
        Msg::ContentGenerated {
            project_id,
            section_id,
            paragraph_id,
            timestamp,
            content,
            sources,
        } => {
            let project = project_mut(state, &project_id)?;
            let paragraph = match paragraph_id {
                Some(paragraph_id) => project.append_generated_as(
                    &section_id,
                    paragraph_id,
                    timestamp.unwrap_or_else(crate::now_timestamp),
                    content,
                    sources,
                )?,
                None => project.append_generated(&section_id, content, sources)?,
            };
            let paragraph_id = paragraph.id.clone();
            vec![Change::ParagraphChanged {
                project_id,
                section_id,
                paragraph_id,
            }]
        }
        Msg::ParagraphRegenerated {
            project_id,
            section_id,
            paragraph_id,
            server_paragraph_id,
            content,
            sources,
        } => {
            let new_id = server_paragraph_id.as_deref().unwrap_or(&paragraph_id);
            let paragraph_id = project_mut(state, &project_id)?
                .regenerate_as(&section_id, &paragraph_id, new_id, content, sources)?
                .id
                .clone();
            vec![Change::ParagraphChanged {
                project_id,
                section_id,
                paragraph_id,
            }]
        }
        Msg::ParagraphEdited {
            project_id,
            section_id,
            paragraph_id,
            content,
        } => {
            project_mut(state, &project_id)?.set_paragraph_content(
                &section_id,
                &paragraph_id,
                content,
            )?;
            vec![Change::ParagraphChanged {
                project_id,
                section_id,
                paragraph_id,
            }]
        }
        Msg::ParagraphRestored {
            project_id,
            section_id,
            paragraph_id,
            version_index,
        } => {
            project_mut(state, &project_id)?.restore(&section_id, &paragraph_id, version_index)?;
            vec![Change::ParagraphChanged {
                project_id,
                section_id,
                paragraph_id,
            }]
        }
    };

    if !changes.is_empty() {
        state.mark_dirty();
    }
    Ok(changes)
}

/// Status refreshes are accepted for documents the client has not listed yet.
fn document_entry<'a>(state: &'a mut AppState, document_id: &str) -> &'a mut Document {
    state
        .documents
        .entry(document_id.to_string())
        .or_insert_with(|| Document::new(document_id, ""))
}

fn project_mut<'a>(
    state: &'a mut AppState,
    project_id: &str,
) -> Result<&'a mut DocumentProject, CoreError> {
    state
        .projects
        .get_mut(project_id)
        .ok_or_else(|| CoreError::NotFound {
            what: "project",
            id: project_id.to_string(),
        })
}

fn title_from(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= TITLE_CHARS {
        trimmed.to_string()
    } else {
        let mut title: String = trimmed.chars().take(TITLE_CHARS).collect();
        title.push_str("...");
        title
    }
}
