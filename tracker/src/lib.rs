//! # Annotation Tracker
//!
//! Runtime that keeps annotations attached to live documents. It sits
//! between an editor (the [`DocumentHost`]), a persistence backend, a
//! language model and any number of subscribers.
//!
//! ## Features
//!
//! - **Debounced Edits**: bursts of keystrokes are applied in one pass
//! - **Single-flight Retagging**: one retag batch per document, cancellable
//! - **Incremental Commits**: each relocated anchor is saved as it resolves
//! - **Repository-local Storage**: JSON files under the repository root
//! - **Change Notifications**: broadcast snapshots after every mutation
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        AnnotationTracker                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  on_edits() ──► DebounceScheduler ──► flush_edits()              │
//! │                                            │                     │
//! │  retag() ──► Retagger ──► CommitSink ──► AnnotationStore         │
//! │                                            │                     │
//! │                                            ▼                     │
//! │                AnnotationPersistence ◄── publish() ──► broadcast │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod host;
pub mod storage;
pub mod tracker;

pub use config::{ModelConfig, RetagSettings, StorageBackend, StorageConfig, TrackerConfig};
pub use debounce::DebounceScheduler;
pub use error::{Result, StorageError, TrackerError};
pub use event::AnnotationsChanged;
pub use host::{DocumentHost, InMemoryHost};
pub use storage::{AnnotationPersistence, JsonFileStore, MemoryPersistence};
pub use tracker::AnnotationTracker;
