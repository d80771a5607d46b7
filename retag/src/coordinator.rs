//! Relocation of stale anchors, one annotation or a whole batch at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_anchors::{
    Annotation, AnnotationId, DEFAULT_DELIMITER, DelimitedSnippet, DocumentText, free_delimiter,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ModelError, RetagError, RetagErrorKind, Result};
use crate::locate::{LineIndex, check_span, locate};
use crate::model::LanguageModel;
use crate::prompt::build_prompt;
use crate::response::decode;

/// Longest slice of a model response written to the debug log.
const LOGGED_RESPONSE_CHARS: usize = 200;

/// Where an annotation stands relative to the live document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "error")]
pub enum AnchorState {
    UpToDate,
    Stale,
    Retagging,
    Failed(RetagErrorKind),
}

impl AnchorState {
    /// `UpToDate` or `Stale`, from the annotation alone.
    pub fn of(annotation: &Annotation, current: &str) -> Self {
        if annotation.is_stale(current) {
            Self::Stale
        } else {
            Self::UpToDate
        }
    }
}

/// How a successful retag produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Already anchored to the current text; nothing was asked.
    Unchanged,
    /// Empty selection reset to the creation-time anchor.
    RestoredOriginal,
    /// Moved to the span reported by the model.
    Relocated,
}

/// A successfully retagged annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Retagged {
    pub annotation: Annotation,
    pub resolution: Resolution,
}

/// Retag tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetagConfig {
    /// Preferred snippet delimiter.
    pub delimiter: char,

    /// Upper bound for a single model request.
    pub request_timeout: Duration,

    /// Minimum gap between the starts of two model requests in a batch.
    pub request_interval: Duration,
}

impl Default for RetagConfig {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            request_timeout: Duration::from_secs(30),
            request_interval: Duration::ZERO,
        }
    }
}

impl RetagConfig {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }
}

/// Receives each batch result as soon as it is known.
#[async_trait]
pub trait RetagSink: Send {
    /// Apply `outcome` for `original`, the annotation as it was when the
    /// batch started. Returns whether the result was applied.
    async fn commit(&mut self, original: &Annotation, outcome: &Result<Retagged>) -> bool;
}

/// Collects successful results in order.
#[async_trait]
impl RetagSink for Vec<Annotation> {
    async fn commit(&mut self, _original: &Annotation, outcome: &Result<Retagged>) -> bool {
        match outcome {
            Ok(retagged) => {
                self.push(retagged.annotation.clone());
                true
            }
            Err(_) => false,
        }
    }
}

/// Result for one annotation of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationOutcome {
    pub id: AnnotationId,
    pub result: std::result::Result<Resolution, RetagError>,
    /// Whether the sink applied the result.
    pub committed: bool,
}

/// Summary of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<AnnotationOutcome>,
    /// Annotations never attempted because the batch was cancelled.
    pub skipped: Vec<AnnotationId>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn committed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.committed).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &AnnotationOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Work left for an annotation once the local checks are done.
enum Plan {
    Done(Retagged),
    Ask { prompt: String },
}

/// Runs the relocation protocol against a language model.
pub struct Retagger {
    model: Arc<dyn LanguageModel>,
    config: RetagConfig,
}

impl Retagger {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            config: RetagConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetagConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RetagConfig {
        &self.config
    }

    /// Retag one annotation against `current`.
    ///
    /// On error the caller keeps the annotation it passed in; nothing about
    /// it is partially updated.
    pub async fn retag(&self, annotation: &Annotation, current: &DocumentText) -> Result<Retagged> {
        match self.plan(annotation, current)? {
            Plan::Done(retagged) => Ok(retagged),
            Plan::Ask { prompt } => self.ask(annotation, current, &prompt).await,
        }
    }

    /// Retag `annotations` in order, handing each result to `sink` as soon as
    /// it is known.
    ///
    /// Model requests are issued one at a time and spaced by
    /// `request_interval`. Cancellation is checked before every item and
    /// while waiting out the interval; items not yet started are reported as
    /// skipped and results already handed to `sink` stay applied.
    pub async fn retag_batch(
        &self,
        annotations: Vec<Annotation>,
        current: &DocumentText,
        cancel: &CancellationToken,
        sink: &mut dyn RetagSink,
    ) -> BatchReport {
        let started_at = Utc::now();
        info!("Retagging {} annotations", annotations.len());

        let mut outcomes = Vec::with_capacity(annotations.len());
        let mut skipped = Vec::new();
        let mut last_request: Option<Instant> = None;
        let mut pending = annotations.into_iter();

        while let Some(annotation) = pending.next() {
            if cancel.is_cancelled() {
                skipped.push(annotation.id().clone());
                skipped.extend(pending.by_ref().map(|a| a.id().clone()));
                break;
            }

            let outcome = match self.plan(&annotation, current) {
                Ok(Plan::Done(retagged)) => Ok(retagged),
                Err(e) => Err(e),
                Ok(Plan::Ask { prompt }) => {
                    if let Some(last) = last_request {
                        let ready = last + self.config.request_interval;
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                skipped.push(annotation.id().clone());
                                continue;
                            }
                            _ = tokio::time::sleep_until(ready) => {}
                        }
                    }
                    last_request = Some(Instant::now());
                    self.ask(&annotation, current, &prompt).await
                }
            };

            if let Err(e) = &outcome {
                warn!("Retag of {} failed ({}): {e}", annotation.id(), e.kind());
            }
            let committed = sink.commit(&annotation, &outcome).await;
            outcomes.push(AnnotationOutcome {
                id: annotation.id().clone(),
                result: outcome.map(|r| r.resolution),
                committed,
            });
        }

        let report = BatchReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
            skipped,
            cancelled: cancel.is_cancelled(),
        };
        info!(
            "Retag batch finished: {} committed, {} failed, {} skipped{}",
            report.committed(),
            report.failed().count(),
            report.skipped.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    /// Everything that can be decided without the model.
    fn plan(&self, annotation: &Annotation, current: &DocumentText) -> Result<Plan> {
        if annotation.is_degenerate() {
            debug!("Restoring empty anchor {} to its original", annotation.id());
            return Ok(Plan::Done(Retagged {
                annotation: annotation.restored_to_original(),
                resolution: Resolution::RestoredOriginal,
            }));
        }

        // A snippet with its delimiters stripped is exactly the stored
        // document, so comparing that to the live text is all it takes.
        if !annotation.is_stale(current) {
            return Ok(Plan::Done(Retagged {
                annotation: annotation.clone(),
                resolution: Resolution::Unchanged,
            }));
        }

        let texts = [&**annotation.document(), &**current];
        let delimiter = free_delimiter(self.config.delimiter, &texts).ok_or_else(|| {
            RetagError::Internal("every candidate delimiter occurs in the text".to_string())
        })?;
        let snippet = DelimitedSnippet::new(
            annotation.document(),
            annotation.start(),
            annotation.end(),
            delimiter,
        )?;

        Ok(Plan::Ask {
            prompt: build_prompt(&snippet, current),
        })
    }

    async fn ask(
        &self,
        annotation: &Annotation,
        current: &DocumentText,
        prompt: &str,
    ) -> Result<Retagged> {
        debug!(
            "Asking {} to relocate {} ({} prompt bytes)",
            self.model.name(),
            annotation.id(),
            prompt.len()
        );

        let timeout = self.config.request_timeout;
        let raw = tokio::time::timeout(timeout, self.model.complete(prompt))
            .await
            .map_err(|_| ModelError::Timeout(timeout.as_secs()))??;
        if raw.trim().is_empty() {
            return Err(ModelError::EmptyResponse.into());
        }
        debug!(
            "Model response for {}: {}",
            annotation.id(),
            raw.chars().take(LOGGED_RESPONSE_CHARS).collect::<String>()
        );

        let answer = decode(&raw, LineIndex::new(current).line_count())?;
        let span = locate(current, &answer)?;
        check_span(&span, current.len())?;

        let relocated = annotation.with_anchor(current.clone(), span.start, span.end)?;
        debug!(
            "Relocated {} from {:?} to {:?}",
            annotation.id(),
            annotation.span(),
            relocated.span()
        );
        Ok(Retagged {
            annotation: relocated,
            resolution: Resolution::Relocated,
        })
    }
}
