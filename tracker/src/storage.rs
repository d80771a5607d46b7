//! Annotation persistence.
//!
//! `JsonFileStore` keeps one JSON file per document under a dedicated
//! directory at the repository root, mirroring the document's place in the
//! repository:
//!
//! ```text
//! <repo>/src/lib.rs  ──►  <repo>/codetations/src/lib.rs.annotations.json
//! ```
//!
//! Writes go through a temp file and a rename, so a crash never leaves a
//! half-written record behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_anchors::{Annotation, DocumentId};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// Loads and saves the annotations of one document at a time.
#[async_trait]
pub trait AnnotationPersistence: Send + Sync {
    /// Saved annotations of `document`; empty when nothing was saved yet.
    async fn load(&self, document: &DocumentId) -> Result<Vec<Annotation>>;

    /// Replace the saved annotations of `document`.
    async fn save(&self, document: &DocumentId, annotations: &[Annotation]) -> Result<()>;
}

/// On-disk record format.
#[derive(Debug, Serialize, Deserialize)]
struct AnnotationFile {
    annotations: Vec<Annotation>,
}

/// Suffix appended to the document's file name.
const FILE_SUFFIX: &str = ".annotations.json";

/// JSON files stored beside the repository the document belongs to.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    /// Directory under the repository root.
    directory: String,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Where the annotations of `document` are kept.
    ///
    /// The repository root is the nearest ancestor holding a `.git` entry;
    /// documents outside any repository use their own directory as root.
    pub async fn annotation_path(&self, document: &DocumentId) -> Result<PathBuf> {
        let path = document_path(document);
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidPath(document.to_string()).into());
        };

        let root = repository_root(parent)
            .await
            .unwrap_or_else(|| parent.to_path_buf());
        let relative = parent.strip_prefix(&root).unwrap_or_else(|_| Path::new(""));

        let mut name = file_name.to_os_string();
        name.push(FILE_SUFFIX);
        Ok(root.join(&self.directory).join(relative).join(name))
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new("codetations")
    }
}

#[async_trait]
impl AnnotationPersistence for JsonFileStore {
    async fn load(&self, document: &DocumentId) -> Result<Vec<Annotation>> {
        let path = self.annotation_path(document).await?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!("No saved annotations for {document}");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", path.display())))?;
        let file: AnnotationFile = serde_json::from_str(&content)?;

        info!(
            "Loaded {} annotations for {document} from {}",
            file.annotations.len(),
            path.display()
        );
        Ok(file.annotations)
    }

    async fn save(&self, document: &DocumentId, annotations: &[Annotation]) -> Result<()> {
        let path = self.annotation_path(document).await?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", dir.display())))?;
        }

        let content = serde_json::to_string_pretty(&AnnotationFile {
            annotations: annotations.to_vec(),
        })?;

        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;

        debug!("Saved {} annotations for {document}", annotations.len());
        Ok(())
    }
}

/// Annotations kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: RwLock<HashMap<DocumentId, Vec<Annotation>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the saved annotations of `document`.
    pub async fn insert(&self, document: DocumentId, annotations: Vec<Annotation>) {
        self.records.write().await.insert(document, annotations);
    }

    /// Last saved annotations of `document`, if any were saved.
    pub async fn saved(&self, document: &DocumentId) -> Option<Vec<Annotation>> {
        self.records.read().await.get(document).cloned()
    }
}

#[async_trait]
impl AnnotationPersistence for MemoryPersistence {
    async fn load(&self, document: &DocumentId) -> Result<Vec<Annotation>> {
        Ok(self.saved(document).await.unwrap_or_default())
    }

    async fn save(&self, document: &DocumentId, annotations: &[Annotation]) -> Result<()> {
        self.insert(document.clone(), annotations.to_vec()).await;
        Ok(())
    }
}

/// File system path named by a document id, accepting `file://` URIs.
fn document_path(document: &DocumentId) -> PathBuf {
    let id = document.as_str();
    PathBuf::from(id.strip_prefix("file://").unwrap_or(id))
}

async fn repository_root(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        if fs::try_exists(dir.join(".git")).await.unwrap_or(false) {
            return Some(dir.to_path_buf());
        }
    }
    None
}
