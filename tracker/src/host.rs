//! The editor side: live document text and selection.

use std::collections::HashMap;
use std::ops::Range;

use async_trait::async_trait;
use tether_anchors::{DocumentId, DocumentText, Edit};
use tokio::sync::RwLock;

use crate::error::{Result, TrackerError};

/// Source of truth for the live text of open documents.
#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// Current text of `document`.
    async fn text(&self, document: &DocumentId) -> Result<DocumentText>;

    /// Current selection in `document`, as a byte range.
    async fn selection(&self, document: &DocumentId) -> Result<Option<Range<usize>>>;
}

#[derive(Debug, Clone)]
struct HostDocument {
    text: DocumentText,
    selection: Option<Range<usize>>,
}

/// Host keeping documents in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    documents: RwLock<HashMap<DocumentId, HostDocument>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full text of `document`, clearing its selection.
    pub async fn set_text(&self, document: DocumentId, text: impl Into<DocumentText>) {
        self.documents.write().await.insert(
            document,
            HostDocument {
                text: text.into(),
                selection: None,
            },
        );
    }

    /// Apply `edits` in order and return the new text.
    ///
    /// Callers forward the same edits to the tracker, as an editor would.
    pub async fn apply_edits(&self, document: &DocumentId, edits: &[Edit]) -> Result<DocumentText> {
        let mut documents = self.documents.write().await;
        let entry = documents
            .get_mut(document)
            .ok_or_else(|| unknown(document))?;

        let mut text = entry.text.to_string();
        for edit in edits {
            text = edit.apply(&text);
        }
        entry.text = DocumentText::from(text);
        entry.selection = None;
        Ok(entry.text.clone())
    }

    /// Select `range` of `document`.
    pub async fn select(&self, document: &DocumentId, range: Range<usize>) -> Result<()> {
        self.documents
            .write()
            .await
            .get_mut(document)
            .ok_or_else(|| unknown(document))?
            .selection = Some(range);
        Ok(())
    }
}

#[async_trait]
impl DocumentHost for InMemoryHost {
    async fn text(&self, document: &DocumentId) -> Result<DocumentText> {
        self.documents
            .read()
            .await
            .get(document)
            .map(|d| d.text.clone())
            .ok_or_else(|| unknown(document))
    }

    async fn selection(&self, document: &DocumentId) -> Result<Option<Range<usize>>> {
        self.documents
            .read()
            .await
            .get(document)
            .map(|d| d.selection.clone())
            .ok_or_else(|| unknown(document))
    }
}

fn unknown(document: &DocumentId) -> TrackerError {
    TrackerError::Host(format!("unknown document {document}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_edits_and_selection() {
        let host = InMemoryHost::new();
        let doc = DocumentId::from("a.rs");
        host.set_text(doc.clone(), "abcdef").await;

        host.select(&doc, 1..3).await.unwrap();
        assert_eq!(host.selection(&doc).await.unwrap(), Some(1..3));

        let text = host
            .apply_edits(&doc, &[Edit::insert(2, "XY"), Edit::delete(0..1)])
            .await
            .unwrap();
        assert_eq!(&*text, "bXYcdef");
        assert_eq!(host.selection(&doc).await.unwrap(), None);

        assert!(host.text(&DocumentId::from("b.rs")).await.is_err());
    }
}
