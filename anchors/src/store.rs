//! The authoritative per-document annotation lists.
//!
//! `AnnotationStore` is the only place annotations are mutated. Callers get
//! owned snapshots back and hand new records in; a record is always swapped
//! in whole.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adjust::{Adjustment, Edit, adjust};
use crate::annotation::{Annotation, AnnotationId, DocumentText};
use crate::error::{AnchorError, Result};

/// Identity of an open document, typically its URI or absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Point-in-time view of one document's annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    pub annotations: Vec<Annotation>,
    pub document_text: DocumentText,
}

#[derive(Debug)]
struct DocumentEntry {
    /// Text the last adjustment pass ended on.
    text: DocumentText,
    annotations: Vec<Annotation>,
}

/// Ordered annotation lists keyed by document.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    documents: HashMap<DocumentId, DocumentEntry>,
}

impl AnnotationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id` with its live `text` and previously saved
    /// annotations.
    ///
    /// Records with an invalid anchor or a duplicate id are dropped. Opening a
    /// document that is already open replaces its entry.
    pub fn open(
        &mut self,
        id: DocumentId,
        text: impl Into<DocumentText>,
        annotations: Vec<Annotation>,
    ) -> DocumentSnapshot {
        let mut seen = HashSet::new();
        let annotations: Vec<Annotation> = annotations
            .into_iter()
            .filter(|annotation| match annotation.validate() {
                Err(e) => {
                    warn!("Dropping annotation {} of {id}: {e}", annotation.id());
                    false
                }
                Ok(()) if !seen.insert(annotation.id().clone()) => {
                    warn!("Dropping duplicate annotation {} of {id}", annotation.id());
                    false
                }
                Ok(()) => true,
            })
            .collect();

        debug!("Opened {id} with {} annotations", annotations.len());
        self.documents.insert(
            id.clone(),
            DocumentEntry {
                text: text.into(),
                annotations,
            },
        );
        self.snapshot_entry(&id)
    }

    /// Stop tracking `id`, returning its final state.
    pub fn close(&mut self, id: &DocumentId) -> Option<DocumentSnapshot> {
        self.documents
            .remove(id)
            .map(|entry| DocumentSnapshot {
                document_id: id.clone(),
                annotations: entry.annotations,
                document_text: entry.text,
            })
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    /// Open document ids.
    pub fn documents(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    /// Text the annotations of `id` were last adjusted to.
    pub fn text(&self, id: &DocumentId) -> Result<DocumentText> {
        Ok(self.entry(id)?.text.clone())
    }

    pub fn annotations(&self, id: &DocumentId) -> Result<&[Annotation]> {
        Ok(&self.entry(id)?.annotations)
    }

    pub fn get(&self, id: &DocumentId, annotation: &AnnotationId) -> Result<&Annotation> {
        self.entry(id)?
            .annotations
            .iter()
            .find(|a| a.id() == annotation)
            .ok_or_else(|| AnchorError::AnnotationNotFound(annotation.to_string()))
    }

    /// Owned view of `id` for notification and persistence.
    pub fn snapshot(&self, id: &DocumentId) -> Result<DocumentSnapshot> {
        self.entry(id)?;
        Ok(self.snapshot_entry(id))
    }

    /// Annotations of `id` that need a retag against `current_text`.
    pub fn stale(&self, id: &DocumentId, current_text: &str) -> Result<Vec<Annotation>> {
        Ok(self
            .entry(id)?
            .annotations
            .iter()
            .filter(|a| a.is_stale(current_text))
            .cloned()
            .collect())
    }

    /// Append a new annotation.
    pub fn insert(&mut self, id: &DocumentId, annotation: Annotation) -> Result<()> {
        annotation.validate()?;
        let entry = self.entry_mut(id)?;
        if entry.annotations.iter().any(|a| a.id() == annotation.id()) {
            return Err(AnchorError::DuplicateId(annotation.id().to_string()));
        }
        entry.annotations.push(annotation);
        Ok(())
    }

    /// Remove an annotation and return it.
    pub fn remove(&mut self, id: &DocumentId, annotation: &AnnotationId) -> Result<Annotation> {
        let entry = self.entry_mut(id)?;
        let index = entry
            .annotations
            .iter()
            .position(|a| a.id() == annotation)
            .ok_or_else(|| AnchorError::AnnotationNotFound(annotation.to_string()))?;
        Ok(entry.annotations.remove(index))
    }

    /// Take `update`'s tool and metadata for the annotation with the same id.
    ///
    /// The stored anchor and creation-time triple win over whatever `update`
    /// carries: anchors only move through edits and retags.
    pub fn update(&mut self, id: &DocumentId, update: &Annotation) -> Result<Annotation> {
        let slot = self.slot_mut(id, update.id())?;
        *slot = slot.merged_with(update);
        Ok(slot.clone())
    }

    /// Run a batch of host edits over the annotations of `id`.
    pub fn apply_edits(&mut self, id: &DocumentId, edits: &[Edit]) -> Result<Adjustment> {
        let entry = self.entry_mut(id)?;
        let adjustment = adjust(&entry.text, edits, &entry.annotations);
        entry.text = adjustment.text.clone();
        entry.annotations = adjustment.annotations.clone();
        Ok(adjustment)
    }

    /// Swap in a relocated anchor for `expected`.
    ///
    /// The swap only happens if the stored record still has the anchor
    /// `expected` had; otherwise something moved it in the meantime and
    /// `Ok(false)` is returned with the store unchanged.
    pub fn commit_anchor(
        &mut self,
        id: &DocumentId,
        expected: &Annotation,
        resolved: &Annotation,
    ) -> Result<bool> {
        resolved.validate()?;
        let slot = self.slot_mut(id, expected.id())?;
        if !slot.same_anchor(expected) {
            return Ok(false);
        }
        *slot = slot
            .with_anchor(resolved.document().clone(), resolved.start(), resolved.end())?;
        Ok(true)
    }

    fn entry(&self, id: &DocumentId) -> Result<&DocumentEntry> {
        self.documents
            .get(id)
            .ok_or_else(|| AnchorError::DocumentNotOpen(id.to_string()))
    }

    fn entry_mut(&mut self, id: &DocumentId) -> Result<&mut DocumentEntry> {
        self.documents
            .get_mut(id)
            .ok_or_else(|| AnchorError::DocumentNotOpen(id.to_string()))
    }

    fn slot_mut(&mut self, id: &DocumentId, annotation: &AnnotationId) -> Result<&mut Annotation> {
        self.entry_mut(id)?
            .annotations
            .iter_mut()
            .find(|a| a.id() == annotation)
            .ok_or_else(|| AnchorError::AnnotationNotFound(annotation.to_string()))
    }

    fn snapshot_entry(&self, id: &DocumentId) -> DocumentSnapshot {
        let entry = &self.documents[id];
        DocumentSnapshot {
            document_id: id.clone(),
            annotations: entry.annotations.clone(),
            document_text: entry.text.clone(),
        }
    }
}
