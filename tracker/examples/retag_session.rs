//! Demo of a tracking session.
//!
//! Annotates a function name, renames the function and asks the configured
//! model to move the annotation. Needs `OPENAI_API_KEY` (or a config file at
//! the default location) for the retag step.
//!
//! Usage: cargo run -p tether-tracker --example retag_session

use std::sync::Arc;

use serde_json::Map;
use tether_anchors::{DocumentId, Edit};
use tether_tracker::{
    AnnotationTracker, InMemoryHost, StorageBackend, StorageConfig, TrackerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = TrackerConfig::load_or_default()
        .await?
        .with_storage(StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        });

    let host = Arc::new(InMemoryHost::new());
    let doc = DocumentId::from("demo.js");
    host.set_text(doc.clone(), "function add(a,b){return a+b}")
        .await;

    let tracker = AnnotationTracker::from_config(host.clone(), &config);
    let mut changes = tracker.subscribe();
    tracker.open_document(doc.clone()).await?;

    let ann = tracker
        .add_annotation(&doc, 9, 12, "comment", Map::new())
        .await?;
    println!("Annotated {:?} at {:?}", ann.anchor_text(), ann.span());

    let rename = vec![Edit::replace(9..12, "sum")];
    host.apply_edits(&doc, &rename).await?;
    tracker.on_edits(&doc, rename).await;

    let report = tracker.retag(&doc).await?;
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(resolution) => println!("{}: {resolution:?}", outcome.id),
            Err(e) => println!("{}: failed ({}): {e}", outcome.id, e.kind()),
        }
    }

    while let Ok(change) = changes.try_recv() {
        for annotation in &change.annotations {
            println!(
                "{} -> {:?} at {:?}",
                annotation.id(),
                annotation.anchor_text(),
                annotation.span()
            );
        }
    }

    Ok(())
}
