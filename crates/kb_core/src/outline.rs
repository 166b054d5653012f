//! Hierarchical section structure of a document project.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineNode>) -> Self {
        self.children = children;
        self
    }
}

/// Outline roots plus the lock flag and the set of valid section ids.
///
/// An empty tree means the outline has not been generated yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutlineTree {
    roots: Vec<OutlineNode>,
    locked: bool,
    section_ids: HashSet<String>,
}

impl OutlineTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from stored parts, validating ids but ignoring the lock.
    pub fn from_parts(roots: Vec<OutlineNode>, locked: bool) -> Result<Self, CoreError> {
        let section_ids = collect_ids(&roots)?;
        Ok(Self {
            roots,
            locked,
            section_ids,
        })
    }

    /// Swaps in a new structure. Nothing changes on error.
    pub fn replace(&mut self, roots: Vec<OutlineNode>) -> Result<(), CoreError> {
        if self.locked {
            return Err(CoreError::OutlineLocked);
        }
        let section_ids = collect_ids(&roots)?;
        self.roots = roots;
        self.section_ids = section_ids;
        Ok(())
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn roots(&self) -> &[OutlineNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.section_ids.len()
    }

    pub fn contains(&self, section_id: &str) -> bool {
        self.section_ids.contains(section_id)
    }

    pub fn find(&self, section_id: &str) -> Option<&OutlineNode> {
        self.preorder().into_iter().find(|node| node.id == section_id)
    }

    /// Labels from the root down to the section's parent, used as generation context.
    pub fn ancestor_labels(&self, section_id: &str) -> Option<Vec<String>> {
        let mut path: Vec<&OutlineNode> = Vec::new();
        if find_path(&self.roots, section_id, &mut path) {
            path.pop();
            Some(path.into_iter().map(|node| node.label.clone()).collect())
        } else {
            None
        }
    }

    /// Nodes in document order (parent before children, siblings in order).
    pub fn preorder(&self) -> Vec<&OutlineNode> {
        let mut out = Vec::with_capacity(self.section_ids.len());
        let mut stack: Vec<&OutlineNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

fn collect_ids(roots: &[OutlineNode]) -> Result<HashSet<String>, CoreError> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&OutlineNode> = roots.iter().collect();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id.clone()) {
            return Err(CoreError::DuplicateNodeId(node.id.clone()));
        }
        stack.extend(node.children.iter());
    }
    Ok(seen)
}

fn find_path<'a>(nodes: &'a [OutlineNode], target: &str, path: &mut Vec<&'a OutlineNode>) -> bool {
    for node in nodes {
        path.push(node);
        if node.id == target || find_path(&node.children, target, path) {
            return true;
        }
        path.pop();
    }
    false
}
