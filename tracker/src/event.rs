//! Change notifications pushed to subscribers.

use serde::{Deserialize, Serialize};
use tether_anchors::{Annotation, DocumentId, DocumentSnapshot, DocumentText};

/// The annotations of a document after a change.
///
/// Sent after every mutation: open, add, remove, update, an edit pass that
/// moved something, and each committed retag result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationsChanged {
    pub document_id: DocumentId,
    pub annotations: Vec<Annotation>,
    pub document_text: DocumentText,
}

impl From<DocumentSnapshot> for AnnotationsChanged {
    fn from(snapshot: DocumentSnapshot) -> Self {
        Self {
            document_id: snapshot.document_id,
            annotations: snapshot.annotations,
            document_text: snapshot.document_text,
        }
    }
}
