//! End-to-end tests for the relocation protocol against a scripted model.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tether_anchors::{Annotation, AnnotationId, DocumentText};
use tether_retag::{
    LanguageModel, ModelError, Resolution, RetagConfig, RetagError, RetagErrorKind, RetagSink,
    Retagged, Retagger,
};
use tokio_util::sync::CancellationToken;

/// Replays canned responses and counts requests.
#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedModel {
    fn replying(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| Ok(r.to_string())).collect()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ModelError::EmptyResponse))
    }
}

fn text(s: &str) -> DocumentText {
    DocumentText::from(s)
}

#[tokio::test]
async fn test_relocates_renamed_function() {
    let model = ScriptedModel::replying(&[r#"{"1": "sum", "2": 1, "3": 1, "4": 1}"#]);
    let retagger = Retagger::new(model.clone());

    let annotation = Annotation::new("function add(a,b){return a+b}", 9, 12, "comment").unwrap();
    let current = text("function sum(a,b){return a+b}");

    let Retagged {
        annotation: moved,
        resolution,
    } = retagger.retag(&annotation, &current).await.unwrap();

    assert_eq!(resolution, Resolution::Relocated);
    assert_eq!(moved.span(), 9..12);
    assert_eq!(moved.anchor_text(), "sum");
    assert_eq!(moved.document(), &current);
    assert_eq!(moved.id(), annotation.id());
    assert_eq!(moved.original(), annotation.original());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_unparsable_response_leaves_annotation_untouched() {
    let model = ScriptedModel::replying(&["Sure! It moved to line 1."]);
    let retagger = Retagger::new(model.clone());

    let annotation = Annotation::new("let x = 1;", 4, 5, "t").unwrap();
    let before = annotation.clone();
    let current = text("let y = 1;");

    let mut sink: Vec<Annotation> = Vec::new();
    let report = retagger
        .retag_batch(
            vec![annotation.clone()],
            &current,
            &CancellationToken::new(),
            &mut sink,
        )
        .await;

    assert_eq!(annotation, before);
    assert!(sink.is_empty());
    assert_eq!(report.committed(), 0);
    let err = report.outcomes[0].result.clone().unwrap_err();
    assert_eq!(err.kind(), RetagErrorKind::JsonParse);
    assert_eq!(err.model_output(), Some("Sure! It moved to line 1."));
}

#[tokio::test]
async fn test_degenerate_anchor_restores_original_without_model() {
    let model = ScriptedModel::replying(&[]);
    let retagger = Retagger::new(model.clone());

    let created = Annotation::new("hello world", 6, 11, "t").unwrap();
    let collapsed = created.with_anchor("hello !", 6, 6).unwrap();

    let retagged = retagger
        .retag(&collapsed, &text("hello there"))
        .await
        .unwrap();

    assert_eq!(retagged.resolution, Resolution::RestoredOriginal);
    assert_eq!(retagged.annotation.span(), 6..11);
    assert_eq!(&**retagged.annotation.document(), "hello world");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_up_to_date_annotation_is_not_sent() {
    let model = ScriptedModel::replying(&[]);
    let retagger = Retagger::new(model.clone());

    let annotation = Annotation::new("abc def", 4, 7, "t").unwrap();
    let retagged = retagger
        .retag(&annotation, &text("abc def"))
        .await
        .unwrap();

    assert_eq!(retagged.resolution, Resolution::Unchanged);
    assert_eq!(retagged.annotation, annotation);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_search_widens_by_one_line() {
    let model = ScriptedModel::replying(&[r#"{"1": "sum", "2": 2, "3": 2, "4": 1}"#]);
    let retagger = Retagger::new(model);

    let annotation = Annotation::new("a\nadd\n", 2, 5, "t").unwrap();
    let current = text("a\nb\nsum\n");

    let retagged = retagger.retag(&annotation, &current).await.unwrap();
    assert_eq!(retagged.annotation.span(), 4..7);
}

#[tokio::test]
async fn test_answer_outside_widened_range_fails() {
    let model = ScriptedModel::replying(&[r#"{"1": "sum", "2": 1, "3": 1, "4": 1}"#]);
    let retagger = Retagger::new(model);

    let annotation = Annotation::new("a\nb\nadd", 4, 7, "t").unwrap();
    let err = retagger
        .retag(&annotation, &text("a\nb\nc\nsum"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RetagError::SnippetMatching {
            text: "sum".to_string(),
            start_line: 1,
            end_line: 2,
        }
    );
}

#[tokio::test]
async fn test_validation_failure_is_classified() {
    let model = ScriptedModel::replying(&[r#"{"1": "sum", "2": 1, "3": 9, "4": 1}"#]);
    let retagger = Retagger::new(model);

    let annotation = Annotation::new("add", 0, 3, "t").unwrap();
    let err = retagger.retag(&annotation, &text("sum")).await.unwrap_err();

    assert_eq!(err.kind(), RetagErrorKind::JsonValidation);
}

#[tokio::test]
async fn test_empty_response_is_a_model_failure() {
    let model = ScriptedModel::replying(&["   "]);
    let retagger = Retagger::new(model);

    let annotation = Annotation::new("add", 0, 3, "t").unwrap();
    let err = retagger.retag(&annotation, &text("sum")).await.unwrap_err();

    assert_eq!(err.kind(), RetagErrorKind::Model);
}

#[tokio::test(start_paused = true)]
async fn test_slow_model_times_out() {
    let model = Arc::new(ScriptedModel {
        delay: Some(Duration::from_secs(60)),
        ..ScriptedModel::default()
    });
    let retagger = Retagger::new(model)
        .with_config(RetagConfig::default().with_request_timeout(Duration::from_secs(1)));

    let annotation = Annotation::new("add", 0, 3, "t").unwrap();
    let err = retagger.retag(&annotation, &text("sum")).await.unwrap_err();

    assert_eq!(err.kind(), RetagErrorKind::Model);
}

#[tokio::test]
async fn test_no_free_delimiter_is_internal() {
    let model = ScriptedModel::replying(&[]);
    let retagger = Retagger::new(model.clone());

    let annotation = Annotation::new("★☆◆◇¤§¶ add", 19, 22, "t").unwrap();
    let err = retagger
        .retag(&annotation, &text("★☆◆◇¤§¶ sum"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RetagErrorKind::Internal);
    assert_eq!(model.calls(), 0);
}

/// Cancels the batch as soon as the first result is committed.
struct CancelAfterFirst {
    cancel: CancellationToken,
    committed: Vec<Annotation>,
}

#[async_trait]
impl RetagSink for CancelAfterFirst {
    async fn commit(
        &mut self,
        _original: &Annotation,
        outcome: &tether_retag::Result<Retagged>,
    ) -> bool {
        if let Ok(retagged) = outcome {
            self.committed.push(retagged.annotation.clone());
        }
        self.cancel.cancel();
        true
    }
}

#[tokio::test]
async fn test_cancellation_keeps_committed_work() {
    let model = ScriptedModel::replying(&[
        r#"{"1": "one", "2": 1, "3": 1, "4": 1}"#,
        r#"{"1": "two", "2": 1, "3": 1, "4": 1}"#,
    ]);
    let retagger = Retagger::new(model.clone());

    let previous = "one two three";
    let current = text("> one two three");
    let annotations = vec![
        Annotation::new(previous, 0, 3, "t").unwrap().with_id("a"),
        Annotation::new(previous, 4, 7, "t").unwrap().with_id("b"),
        Annotation::new(previous, 8, 13, "t").unwrap().with_id("c"),
    ];

    let cancel = CancellationToken::new();
    let mut sink = CancelAfterFirst {
        cancel: cancel.clone(),
        committed: Vec::new(),
    };
    let report = retagger
        .retag_batch(annotations, &current, &cancel, &mut sink)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].result, Ok(Resolution::Relocated));
    assert_eq!(
        report.skipped.iter().map(AnnotationId::as_str).collect::<Vec<_>>(),
        vec!["b", "c"]
    );
    assert_eq!(sink.committed[0].span(), 2..5);
    assert_eq!(model.calls(), 1);
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test(start_paused = true)]
async fn test_requests_are_paced() {
    let model = ScriptedModel::replying(&[
        r#"{"1": "one", "2": 1, "3": 1, "4": 1}"#,
        r#"{"1": "two", "2": 1, "3": 1, "4": 1}"#,
    ]);
    let retagger = Retagger::new(model.clone())
        .with_config(RetagConfig::default().with_request_interval(Duration::from_secs(10)));

    let previous = "one two";
    let current = text("one, two");
    let annotations = vec![
        Annotation::new(previous, 0, 3, "t").unwrap(),
        Annotation::new(previous, 4, 7, "t").unwrap(),
    ];

    let started = tokio::time::Instant::now();
    let mut sink: Vec<Annotation> = Vec::new();
    let report = retagger
        .retag_batch(annotations, &current, &CancellationToken::new(), &mut sink)
        .await;

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(report.committed(), 2);
    assert_eq!(
        sink.iter().map(Annotation::anchor_text).collect::<Vec<_>>(),
        vec!["one", "two"]
    );
}
