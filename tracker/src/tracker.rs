//! The per-document annotation runtime.
//!
//! `AnnotationTracker` owns the annotation store and wires it to the
//! document host, persistence, the retagger and subscribers:
//!
//! - edits are queued per document and applied in bursts after a quiet
//!   period, or immediately on an explicit flush;
//! - at most one retag batch runs per document, and its results are
//!   committed one by one as they arrive;
//! - every mutation is saved and then broadcast as [`AnnotationsChanged`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tether_anchors::{
    Adjustment, Annotation, AnnotationId, AnnotationStore, DocumentId, DocumentSnapshot, Edit,
};
use tether_retag::{
    AnchorState, BatchReport, LanguageModel, Resolution, RetagConfig, RetagSink, Retagged,
    Retagger,
};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{StorageBackend, TrackerConfig};
use crate::debounce::DebounceScheduler;
use crate::error::{Result, TrackerError};
use crate::event::AnnotationsChanged;
use crate::host::DocumentHost;
use crate::storage::{AnnotationPersistence, JsonFileStore, MemoryPersistence};

/// Tracks the annotations of every open document. Cheap to clone.
#[derive(Clone)]
pub struct AnnotationTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: RwLock<AnnotationStore>,
    host: Arc<dyn DocumentHost>,
    persistence: Arc<dyn AnnotationPersistence>,
    retagger: Retagger,
    debouncer: DebounceScheduler<DocumentId>,

    /// Edits received but not yet applied, in arrival order.
    pending_edits: Mutex<HashMap<DocumentId, Vec<Edit>>>,

    /// Running retag batches, at most one per document.
    retags: Mutex<HashMap<DocumentId, RetagBatch>>,
    next_batch: AtomicU64,

    /// Retag progress and failures, layered over plain staleness.
    states: RwLock<StateOverlay>,

    /// Serializes save-and-notify so saved files never go backwards.
    publish_lock: Mutex<()>,

    events: broadcast::Sender<AnnotationsChanged>,
}

impl AnnotationTracker {
    pub fn new(
        host: Arc<dyn DocumentHost>,
        persistence: Arc<dyn AnnotationPersistence>,
        model: Arc<dyn LanguageModel>,
        config: &TrackerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.notification_capacity.max(1));
        let retagger = Retagger::new(model).with_config(RetagConfig::from(&config.retag));

        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(AnnotationStore::new()),
                host,
                persistence,
                retagger,
                debouncer: DebounceScheduler::new(config.debounce()),
                pending_edits: Mutex::new(HashMap::new()),
                retags: Mutex::new(HashMap::new()),
                next_batch: AtomicU64::new(0),
                states: RwLock::new(HashMap::new()),
                publish_lock: Mutex::new(()),
                events,
            }),
        }
    }

    /// Build persistence and the model backend from `config`.
    pub fn from_config(host: Arc<dyn DocumentHost>, config: &TrackerConfig) -> Self {
        let persistence: Arc<dyn AnnotationPersistence> = match config.storage.backend {
            StorageBackend::Json => Arc::new(JsonFileStore::new(&config.storage.directory)),
            StorageBackend::Memory => Arc::new(MemoryPersistence::new()),
        };
        let model = config.model.build();
        if !model.is_available() {
            warn!("No API key configured, retagging will fail until one is set");
        }
        Self::new(host, persistence, Arc::new(model), config)
    }

    /// Receive a notification after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<AnnotationsChanged> {
        self.inner.events.subscribe()
    }

    /// Start tracking `document` with its saved annotations.
    pub async fn open_document(&self, document: DocumentId) -> Result<DocumentSnapshot> {
        let text = self.inner.host.text(&document).await?;
        let saved = self.inner.persistence.load(&document).await?;
        let snapshot = self.inner.store.write().await.open(document, text, saved);

        info!(
            "Tracking {} with {} annotations",
            snapshot.document_id,
            snapshot.annotations.len()
        );
        self.notify(snapshot.clone());
        Ok(snapshot)
    }

    /// Apply outstanding edits, stop any retag and save the final state.
    ///
    /// A running retag is cancelled and awaited, so the result of its
    /// in-flight request is committed before the document closes.
    pub async fn close_document(&self, document: &DocumentId) -> Result<Option<DocumentSnapshot>> {
        self.inner.debouncer.cancel(document).await;
        self.flush_edits(document).await?;

        let running = self.inner.retags.lock().await.get(document).map(|batch| {
            batch.cancel.cancel();
            batch.done.clone()
        });
        if let Some(done) = running {
            info!("Waiting for the retag of {document} to stop");
            done.cancelled().await;
        }

        let _guard = self.inner.publish_lock.lock().await;
        let closed = self.inner.store.write().await.close(document);
        self.inner.states.write().await.remove(document);

        if let Some(snapshot) = &closed {
            self.inner
                .persistence
                .save(document, &snapshot.annotations)
                .await?;
            info!("Closed {document}");
        }
        Ok(closed)
    }

    pub async fn documents(&self) -> Vec<DocumentId> {
        self.inner.store.read().await.documents().cloned().collect()
    }

    /// Annotate `start..end` of the current text.
    pub async fn add_annotation(
        &self,
        document: &DocumentId,
        start: usize,
        end: usize,
        tool: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<Annotation> {
        self.flush_edits(document).await?;

        let annotation = {
            let mut store = self.inner.store.write().await;
            let annotation =
                Annotation::new(store.text(document)?, start, end, tool)?.with_metadata(metadata);
            store.insert(document, annotation.clone())?;
            annotation
        };

        debug!("Added annotation {} to {document}", annotation.id());
        self.publish(document).await?;
        Ok(annotation)
    }

    /// Annotate the host's current selection.
    pub async fn annotate_selection(
        &self,
        document: &DocumentId,
        tool: impl Into<String>,
    ) -> Result<Annotation> {
        let selection = self
            .inner
            .host
            .selection(document)
            .await?
            .ok_or_else(|| TrackerError::NoSelection(document.clone()))?;
        self.add_annotation(document, selection.start, selection.end, tool, Map::new())
            .await
    }

    pub async fn remove_annotation(
        &self,
        document: &DocumentId,
        id: &AnnotationId,
    ) -> Result<Annotation> {
        let removed = self.inner.store.write().await.remove(document, id)?;
        if let Some(states) = self.inner.states.write().await.get_mut(document) {
            states.remove(id);
        }

        debug!("Removed annotation {id} from {document}");
        self.publish(document).await?;
        Ok(removed)
    }

    /// Replace the tool and metadata of an existing annotation.
    pub async fn update_annotation(
        &self,
        document: &DocumentId,
        update: &Annotation,
    ) -> Result<Annotation> {
        let stored = self.inner.store.write().await.update(document, update)?;
        self.publish(document).await?;
        Ok(stored)
    }

    pub async fn annotations(&self, document: &DocumentId) -> Result<Vec<Annotation>> {
        Ok(self.inner.store.read().await.annotations(document)?.to_vec())
    }

    pub async fn snapshot(&self, document: &DocumentId) -> Result<DocumentSnapshot> {
        Ok(self.inner.store.read().await.snapshot(document)?)
    }

    /// Queue host edits; they are applied once `document` has been quiet for
    /// the debounce window.
    pub async fn on_edits(&self, document: &DocumentId, edits: Vec<Edit>) {
        if edits.is_empty() {
            return;
        }
        self.inner
            .pending_edits
            .lock()
            .await
            .entry(document.clone())
            .or_default()
            .extend(edits);

        let tracker = self.clone();
        let key = document.clone();
        self.inner
            .debouncer
            .schedule(document.clone(), async move {
                if let Err(e) = tracker.flush_edits(&key).await {
                    warn!("Failed to apply edits to {key}: {e}");
                }
            })
            .await;
    }

    /// Apply every queued edit of `document` now.
    ///
    /// Returns `None` when nothing was queued.
    pub async fn flush_edits(&self, document: &DocumentId) -> Result<Option<Adjustment>> {
        let adjustment = {
            // Held until the store is updated so batches apply in arrival order.
            let mut pending = self.inner.pending_edits.lock().await;
            let Some(edits) = pending.remove(document).filter(|e| !e.is_empty()) else {
                return Ok(None);
            };
            self.inner
                .store
                .write()
                .await
                .apply_edits(document, &edits)?
        };

        debug!(
            "Applied edits to {document}: {} shifted, {} invalidated",
            adjustment.shifted, adjustment.invalidated
        );
        if adjustment.changed() || adjustment.invalidated > 0 {
            self.publish(document).await?;
        }
        Ok(Some(adjustment))
    }

    /// Annotations of `document` that no longer match the live text.
    pub async fn stale_annotations(&self, document: &DocumentId) -> Result<Vec<Annotation>> {
        let current = self.inner.host.text(document).await?;
        Ok(self.inner.store.read().await.stale(document, &current)?)
    }

    /// State of every annotation of `document`, in list order.
    pub async fn anchor_states(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<(AnnotationId, AnchorState)>> {
        let current = self.inner.host.text(document).await?;
        let overlay = self
            .inner
            .states
            .read()
            .await
            .get(document)
            .cloned()
            .unwrap_or_default();

        let store = self.inner.store.read().await;
        Ok(store
            .annotations(document)?
            .iter()
            .map(|a| {
                // Retag progress only describes anchors that are still stale.
                let state = match (AnchorState::of(a, &current), overlay.get(a.id())) {
                    (AnchorState::Stale, Some(&overlaid)) => overlaid,
                    (computed, _) => computed,
                };
                (a.id().clone(), state)
            })
            .collect())
    }

    /// Retag every stale annotation of `document`.
    ///
    /// Fails with [`TrackerError::RetagInFlight`] while another batch for the
    /// same document is running.
    ///
    /// Dropping the returned future before it completes stops the batch and
    /// frees the document for the next one.
    pub async fn retag(&self, document: &DocumentId) -> Result<BatchReport> {
        let (guard, cancel) = {
            let mut retags = self.inner.retags.lock().await;
            if retags.contains_key(document) {
                return Err(TrackerError::RetagInFlight(document.clone()));
            }
            let batch = RetagBatch {
                id: self.inner.next_batch.fetch_add(1, Ordering::Relaxed),
                cancel: CancellationToken::new(),
                done: CancellationToken::new(),
            };
            let cancel = batch.cancel.clone();
            let guard = BatchGuard {
                inner: self.inner.clone(),
                document: document.clone(),
                batch: batch.id,
                finished: false,
            };
            retags.insert(document.clone(), batch);
            (guard, cancel)
        };

        let result = self.run_retag(document, &cancel).await;
        guard.finish().await;
        result
    }

    /// Ask a running batch to stop after its current item.
    pub async fn cancel_retag(&self, document: &DocumentId) -> bool {
        match self.inner.retags.lock().await.get(document) {
            Some(batch) => {
                info!("Cancelling retag of {document}");
                batch.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_retagging(&self, document: &DocumentId) -> bool {
        self.inner.retags.lock().await.contains_key(document)
    }

    async fn run_retag(
        &self,
        document: &DocumentId,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        self.flush_edits(document).await?;

        let current = self.inner.host.text(document).await?;
        let stale = self.inner.store.read().await.stale(document, &current)?;
        info!("Retagging {} stale annotations of {document}", stale.len());

        {
            let mut states = self.inner.states.write().await;
            let states = states.entry(document.clone()).or_default();
            for annotation in &stale {
                states.insert(annotation.id().clone(), AnchorState::Retagging);
            }
        }

        let mut sink = CommitSink {
            tracker: self,
            document,
        };
        Ok(self
            .inner
            .retagger
            .retag_batch(stale, &current, cancel, &mut sink)
            .await)
    }

    /// Save the current annotations of `document` and notify subscribers.
    async fn publish(&self, document: &DocumentId) -> Result<()> {
        let _guard = self.inner.publish_lock.lock().await;
        let snapshot = self.inner.store.read().await.snapshot(document)?;
        self.inner
            .persistence
            .save(document, &snapshot.annotations)
            .await?;
        self.notify(snapshot);
        Ok(())
    }

    fn notify(&self, snapshot: DocumentSnapshot) {
        let document = snapshot.document_id.clone();
        if self.inner.events.send(snapshot.into()).is_err() {
            debug!("No subscribers for changes to {document}");
        }
    }
}

type StateOverlay = HashMap<DocumentId, HashMap<AnnotationId, AnchorState>>;

struct RetagBatch {
    id: u64,
    cancel: CancellationToken,
    /// Cancelled once the batch has released its document.
    done: CancellationToken,
}

impl Inner {
    async fn end_batch(&self, document: &DocumentId, batch: u64) {
        let mut retags = self.retags.lock().await;
        let mut states = self.states.write().await;
        Self::clear_batch(&mut retags, &mut states, document, batch);
    }

    /// Forget `batch` and the `Retagging` marks it left behind.
    fn clear_batch(
        retags: &mut HashMap<DocumentId, RetagBatch>,
        states: &mut StateOverlay,
        document: &DocumentId,
        batch: u64,
    ) {
        if !retags.get(document).is_some_and(|running| running.id == batch) {
            return;
        }
        if let Some(states) = states.get_mut(document) {
            states.retain(|_, state| *state != AnchorState::Retagging);
        }
        if let Some(running) = retags.remove(document) {
            running.cancel.cancel();
            running.done.cancel();
        }
    }
}

/// Releases the document's retag slot when the batch ends, even if the
/// caller drops the retag future halfway.
struct BatchGuard {
    inner: Arc<Inner>,
    document: DocumentId,
    batch: u64,
    finished: bool,
}

impl BatchGuard {
    async fn finish(mut self) {
        self.inner.end_batch(&self.document, self.batch).await;
        self.finished = true;
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Retag of {} was dropped before it finished", self.document);

        if let (Ok(mut retags), Ok(mut states)) =
            (self.inner.retags.try_lock(), self.inner.states.try_write())
        {
            Inner::clear_batch(&mut retags, &mut states, &self.document, self.batch);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = self.inner.clone();
                let document = self.document.clone();
                let batch = self.batch;
                runtime.spawn(async move { inner.end_batch(&document, batch).await });
            }
            Err(_) => warn!("Cannot release retag of {} outside a runtime", self.document),
        }
    }
}

/// Commits batch results into the store as they arrive.
struct CommitSink<'a> {
    tracker: &'a AnnotationTracker,
    document: &'a DocumentId,
}

#[async_trait]
impl RetagSink for CommitSink<'_> {
    async fn commit(
        &mut self,
        original: &Annotation,
        outcome: &tether_retag::Result<Retagged>,
    ) -> bool {
        let inner = &self.tracker.inner;
        let id = original.id();

        let retagged = match outcome {
            Ok(retagged) => retagged,
            Err(e) => {
                if let Some(states) = inner.states.write().await.get_mut(self.document) {
                    states.insert(id.clone(), AnchorState::Failed(e.kind()));
                }
                return false;
            }
        };

        let committed = inner.store.write().await.commit_anchor(
            self.document,
            original,
            &retagged.annotation,
        );
        if let Some(states) = inner.states.write().await.get_mut(self.document) {
            states.remove(id);
        }

        match committed {
            Ok(true) => {
                if retagged.resolution != Resolution::Unchanged {
                    if let Err(e) = self.tracker.publish(self.document).await {
                        warn!("Failed to save retag of {id}: {e}");
                    }
                }
                true
            }
            Ok(false) => {
                warn!("Dropping retag of {id}: the annotation changed while it was in flight");
                false
            }
            Err(e) => {
                warn!("Cannot commit retag of {id}: {e}");
                false
            }
        }
    }
}
