//! Per-section paragraphs with append-only version history.
//!
//! History only grows: regenerating or restoring a paragraph first pushes
//! its current content as a new [`ParagraphVersion`]. Direct edits overwrite
//! the current content without touching history. Index 0 is always the
//! oldest superseded version.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{now_timestamp, CoreError, Source};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphVersion {
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(alias = "paragraph_id")]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub versions: Vec<ParagraphVersion>,
}

impl Paragraph {
    pub fn new(id: impl Into<String>, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            timestamp: timestamp.into(),
            versions: Vec::new(),
        }
    }

    fn supersede(&mut self, content: String, timestamp: String) {
        let previous = ParagraphVersion {
            content: std::mem::replace(&mut self.content, content),
            timestamp: std::mem::replace(&mut self.timestamp, timestamp),
        };
        self.versions.push(previous);
    }

    fn restore(&mut self, version_index: usize, timestamp: String) -> Result<(), CoreError> {
        let restored = self
            .versions
            .get(version_index)
            .map(|version| version.content.clone())
            .ok_or(CoreError::IndexOutOfRange {
                index: version_index,
                len: self.versions.len(),
            })?;
        self.supersede(restored, timestamp);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionContent {
    pub section_id: String,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl SectionContent {
    pub fn new(section_id: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            paragraphs: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn paragraph(&self, paragraph_id: &str) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| p.id == paragraph_id)
    }

    fn paragraph_mut(&mut self, paragraph_id: &str) -> Result<&mut Paragraph, CoreError> {
        self.paragraphs
            .iter_mut()
            .find(|p| p.id == paragraph_id)
            .ok_or_else(|| CoreError::not_found("paragraph", paragraph_id))
    }
}

/// Section id to section content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParagraphLedger {
    sections: BTreeMap<String, SectionContent>,
}

impl ParagraphLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionContent> {
        self.sections.get(section_id)
    }

    pub fn sections(&self) -> impl Iterator<Item = &SectionContent> {
        self.sections.values()
    }

    pub fn paragraph(&self, section_id: &str, paragraph_id: &str) -> Option<&Paragraph> {
        self.section(section_id)
            .and_then(|section| section.paragraph(paragraph_id))
    }

    /// Hand edit: overwrites content and timestamp in place, no version entry.
    pub fn set_content(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        content: impl Into<String>,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph = self.paragraph_mut(section_id, paragraph_id)?;
        paragraph.content = content.into();
        paragraph.timestamp = now_timestamp();
        Ok(paragraph)
    }

    /// First generation for a slot: always a brand-new paragraph with its own
    /// id and empty history.
    pub fn append_generated(
        &mut self,
        section_id: &str,
        content: impl Into<String>,
        sources: Vec<Source>,
    ) -> &Paragraph {
        let paragraph = Paragraph::new(uuid::Uuid::new_v4().to_string(), content, now_timestamp());
        self.push_paragraph(section_id, paragraph, sources)
    }

    /// Same as [`Self::append_generated`] but keeps the id and timestamp the
    /// server assigned.
    pub fn append_generated_as(
        &mut self,
        section_id: &str,
        paragraph_id: impl Into<String>,
        timestamp: impl Into<String>,
        content: impl Into<String>,
        sources: Vec<Source>,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph_id = paragraph_id.into();
        if self.paragraph(section_id, &paragraph_id).is_some() {
            return Err(CoreError::DuplicateParagraphId(paragraph_id));
        }
        let paragraph = Paragraph::new(paragraph_id, content, timestamp);
        Ok(self.push_paragraph(section_id, paragraph, sources))
    }

    /// Pushes the current content onto history, then adopts `content`.
    pub fn regenerate(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        content: impl Into<String>,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph = self.paragraph_mut(section_id, paragraph_id)?;
        paragraph.supersede(content.into(), now_timestamp());
        Ok(paragraph)
    }

    /// Like [`Self::regenerate`], then moves the paragraph, history included,
    /// to the id the server issued for the new content. Nothing changes on
    /// error.
    pub fn regenerate_as(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        new_id: &str,
        content: impl Into<String>,
    ) -> Result<&Paragraph, CoreError> {
        if new_id != paragraph_id && self.paragraph(section_id, new_id).is_some() {
            return Err(CoreError::DuplicateParagraphId(new_id.to_string()));
        }
        let paragraph = self.paragraph_mut(section_id, paragraph_id)?;
        paragraph.supersede(content.into(), now_timestamp());
        paragraph.id = new_id.to_string();
        Ok(paragraph)
    }

    /// Replaces the section-level citations, e.g. after a regeneration.
    pub fn set_sources(&mut self, section_id: &str, sources: Vec<Source>) -> Result<(), CoreError> {
        let section = self
            .sections
            .get_mut(section_id)
            .ok_or_else(|| CoreError::not_found("section", section_id))?;
        section.sources = sources;
        Ok(())
    }

    /// Makes a historical version current. The current content is pushed
    /// first and the referenced version stays where it is.
    pub fn restore(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
        version_index: usize,
    ) -> Result<&Paragraph, CoreError> {
        let paragraph = self.paragraph_mut(section_id, paragraph_id)?;
        paragraph.restore(version_index, now_timestamp())?;
        Ok(paragraph)
    }

    fn push_paragraph(
        &mut self,
        section_id: &str,
        paragraph: Paragraph,
        sources: Vec<Source>,
    ) -> &Paragraph {
        let section = self
            .sections
            .entry(section_id.to_string())
            .or_insert_with(|| SectionContent::new(section_id));
        section.sources = sources;
        section.paragraphs.push(paragraph);
        &section.paragraphs[section.paragraphs.len() - 1]
    }

    fn paragraph_mut(
        &mut self,
        section_id: &str,
        paragraph_id: &str,
    ) -> Result<&mut Paragraph, CoreError> {
        self.sections
            .get_mut(section_id)
            .ok_or_else(|| CoreError::not_found("section", section_id))?
            .paragraph_mut(paragraph_id)
    }
}
