//! The document project aggregate: outline, section content, metadata.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{now_timestamp, CoreError, OutlineNode, OutlineTree, Paragraph, ParagraphLedger, Source};

/// Wire and persistence shape of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_ids: Vec<String>,
    #[serde(default)]
    pub outline: Option<Vec<OutlineNode>>,
    #[serde(default)]
    pub outline_locked: bool,
    #[serde(default)]
    pub sections: ParagraphLedger,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProjectRecord", into = "ProjectRecord")]
pub struct DocumentProject {
    pub id: String,
    pub title: String,
    pub folder_ids: BTreeSet<String>,
    outline: OutlineTree,
    sections: ParagraphLedger,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentProject {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        folder_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let now = now_timestamp();
        Self {
            id: id.into(),
            title: title.into(),
            folder_ids: folder_ids.into_iter().collect(),
            outline: OutlineTree::new(),
            sections: ParagraphLedger::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn outline(&self) -> &OutlineTree {
        &self.outline
    }

    pub fn sections(&self) -> &ParagraphLedger {
        &self.sections
    }

    pub fn replace_outline(&mut self, roots: Vec<OutlineNode>) -> Result<(), CoreError> {
        self.outline.replace(roots)?;
        self.touch();
        Ok(())
    }

    pub fn set_outline_locked(&mut self, locked: bool) {
        self.outline.set_locked(locked);
        self.touch();
    }

    /// Section label and its ancestors' labels, as sent with generation requests.
    pub fn generation_context(&self, section_id: &str) -> Result<(String, Vec<String>), CoreError> {
        let node = self
            .outline
            .find(section_id)
            .ok_or_else(|| CoreError::not_found("section", section_id))?;
        let ancestors = self.outline.ancestor_labels(section_id).unwrap_or_default();
        Ok((node.label.clone(), ancestors))
    }

    /// Hand edit of a paragraph; history is untouched.
    pub fn set_paragraph_content(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        content: impl Into<String>,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph = self.sections.set_content(section_id, paragraph_id, content)?;
        self.updated_at = now_timestamp();
        Ok(paragraph)
    }

    pub fn append_generated(
        &mut self,
        section_id: &str,
        content: impl Into<String>,
        sources: Vec<Source>,
    ) -> Result<&Paragraph, CoreError> {
        self.ensure_section(section_id)?;
        let paragraph = self.sections.append_generated(section_id, content, sources);
        self.updated_at = now_timestamp();
        Ok(paragraph)
    }

    pub fn append_generated_as(
        &mut self,
        section_id: &str,
        paragraph_id: impl Into<String>,
        timestamp: impl Into<String>,
        content: impl Into<String>,
        sources: Vec<Source>,
    ) -> Result<&Paragraph, CoreError> {
        self.ensure_section(section_id)?;
        let paragraph = self
            .sections
            .append_generated_as(section_id, paragraph_id, timestamp, content, sources)?;
        self.updated_at = now_timestamp();
        Ok(paragraph)
    }

    /// Regenerates a paragraph and, when given, replaces the section's sources.
    pub fn regenerate(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        content: impl Into<String>,
        sources: Option<Vec<Source>>,
    ) -> Result<&Paragraph, CoreError> {
        self.regenerate_as(section_id, paragraph_id, paragraph_id, content, sources)
    }

    /// Regenerates a paragraph that the server re-keyed to `new_id`.
    pub fn regenerate_as(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        new_id: &str,
        content: impl Into<String>,
        sources: Option<Vec<Source>>,
    ) -> Result<&Paragraph, CoreError> {
        if self.sections.paragraph(section_id, paragraph_id).is_none() {
            return Err(CoreError::not_found("paragraph", paragraph_id));
        }
        if new_id != paragraph_id && self.sections.paragraph(section_id, new_id).is_some() {
            return Err(CoreError::DuplicateParagraphId(new_id.to_string()));
        }
        if let Some(sources) = sources {
            self.sections.set_sources(section_id, sources)?;
        }
        let paragraph = self
            .sections
            .regenerate_as(section_id, paragraph_id, new_id, content)?;
        self.updated_at = now_timestamp();
        Ok(paragraph)
    }

    pub fn restore(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        version_index: usize,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph = self.sections.restore(section_id, paragraph_id, version_index)?;
        self.updated_at = now_timestamp();
        Ok(paragraph)
    }

    fn ensure_section(&self, section_id: &str) -> Result<(), CoreError> {
        if self.outline.contains(section_id) {
            Ok(())
        } else {
            Err(CoreError::not_found("section", section_id))
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }
}

impl TryFrom<ProjectRecord> for DocumentProject {
    type Error = CoreError;

    fn try_from(record: ProjectRecord) -> Result<Self, Self::Error> {
        let outline = OutlineTree::from_parts(record.outline.unwrap_or_default(), record.outline_locked)?;
        Ok(Self {
            id: record.id,
            title: record.title,
            folder_ids: record.folder_ids.into_iter().collect(),
            outline,
            sections: record.sections,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl From<DocumentProject> for ProjectRecord {
    fn from(project: DocumentProject) -> Self {
        let outline = if project.outline.is_empty() {
            None
        } else {
            Some(project.outline.roots().to_vec())
        };
        Self {
            id: project.id,
            title: project.title,
            folder_ids: project.folder_ids.into_iter().collect(),
            outline_locked: project.outline.is_locked(),
            outline,
            sections: project.sections,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}
