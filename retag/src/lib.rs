//! # Annotation Retagging
//!
//! Relocates annotations whose anchor no longer matches the live document.
//! Cheap offset arithmetic lives in `tether-anchors`; this crate handles the
//! edits that arithmetic cannot follow by asking a language model where the
//! anchored text went and verifying the answer locally.
//!
//! ## Protocol
//!
//! 1. Empty anchors are reset to their creation-time triple.
//! 2. Anchors already matching the live text are left alone.
//! 3. The old snapshot is sent with the anchor wrapped in a delimiter, next to
//!    the line-numbered live text.
//! 4. The answer (text, line range, occurrence) is decoded and validated.
//! 5. The text is searched in the answered lines, then once more with one
//!    extra line on each side.
//!
//! Any failure leaves the annotation exactly as it was.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Retagger                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Annotation ──► build_prompt() ──► LanguageModel::complete()     │
//! │                                            │                     │
//! │                                            ▼                     │
//! │  Retagged ◄── check_span() ◄── locate() ◄── decode()             │
//! │      │                                                           │
//! │      ▼                                                           │
//! │  RetagSink::commit()  (per item, in batch order)                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod coordinator;
pub mod error;
pub mod locate;
pub mod model;
pub mod prompt;
pub mod response;

pub use coordinator::{
    AnchorState, AnnotationOutcome, BatchReport, Resolution, RetagConfig, RetagSink, Retagged,
    Retagger,
};
pub use error::{ModelError, Result, RetagError, RetagErrorKind};
pub use locate::{LineIndex, check_span, locate};
pub use model::{LanguageModel, OpenAiChatModel};
pub use prompt::{build_prompt, number_lines};
pub use response::{RelocationAnswer, decode};
