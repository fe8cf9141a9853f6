//! Query-path behavior: status-aware non-answers, grounded answers, degradation.

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::*;
use docrag::document::{DocumentId, ProcessingState};
use docrag::query::QueryOutcome;
use httpmock::{Method::POST, MockServer};
use regex::Regex;
use serde_json::json;

#[tokio::test]
async fn querying_a_pending_document_returns_a_non_answer() {
    let server = MockServer::start_async().await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let service = service_against(&server, workspace.path().join("images"));

    let source = write_source(workspace.path());
    let id = service.register("paper.pdf", source, 18);

    let result = service
        .answer(id, "what does the paper say?", 5)
        .await
        .expect("answer");

    assert_eq!(result.diagnostics.outcome, QueryOutcome::DocumentPending);
    assert!(result.sources.is_empty());
    assert!(result.related_images.is_empty());
    assert_eq!(result.confidence, Some(0.0));
    assert!(result.answer.contains("queued"));
}

#[tokio::test]
async fn querying_an_unknown_document_is_not_found() {
    let server = MockServer::start_async().await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let service = service_against(&server, workspace.path().join("images"));

    let missing = DocumentId::generate();
    assert!(service.answer(missing, "anything", 5).await.is_err());
}

/// Ingest a 2-text/1-image document and mount a search response covering its keys.
async fn completed_document(
    server: &MockServer,
    workspace: &std::path::Path,
) -> (std::sync::Arc<docrag::pipeline::DocumentService>, DocumentId) {
    let service = service_against(server, workspace.join("images"));

    mount_qdrant_ok(server).await;
    mount_parse(
        server,
        json!([
            { "type": "text", "text": "The throughput peaked at 42 requests per second." },
            { "type": "text", "text": "Latency stayed below five milliseconds." },
            { "type": "image", "image_base64": BASE64.encode(b"throughput chart bytes") }
        ]),
    )
    .await;
    mount_model(server, SUMMARY_MODEL, "performance summary").await;
    mount_model(server, VISION_MODEL, "a throughput chart").await;

    let source = write_source(workspace);
    let id = service.register("perf.pdf", source, 18);
    service.clone().start_processing(id).expect("start");
    let snapshot = wait_for_terminal(&service, id).await;
    assert_eq!(snapshot.state, ProcessingState::Completed);

    // Mount the similarity response from the keys the index actually assigned:
    // insertion order is texts then images, so seq mirrors position.
    let keys = service.index(id).expect("index").keys();
    let hits: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(seq, key)| {
            let content_type = if seq < 2 { "text" } else { "image" };
            json!({
                "id": key.to_string(),
                "score": 0.9 - (seq as f32) * 0.1,
                "payload": {
                    "retrieval_key": key.to_string(),
                    "content_type": content_type,
                    "seq": seq
                }
            })
        })
        .collect();
    server
        .mock_async(move |when, then| {
            when.method(POST)
                .path_matches(Regex::new(r"/points/query$").unwrap());
            then.status(200).json_body(json!({ "result": hits }));
        })
        .await;

    (service, id)
}

#[tokio::test]
async fn completed_document_yields_a_grounded_answer() {
    let server = MockServer::start_async().await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (service, id) = completed_document(&server, workspace.path()).await;
    mount_model(&server, ANSWER_MODEL, "Throughput peaked at 42 rps.").await;

    let result = service
        .answer(id, "what was the peak throughput?", 5)
        .await
        .expect("answer");

    assert_eq!(result.diagnostics.outcome, QueryOutcome::Answered);
    assert_eq!(result.answer, "Throughput peaked at 42 rps.");
    assert!(result.confidence.is_none());
    assert!(result.elapsed_seconds >= 0.0);

    // One source per retrieved unit, bounded by max_results.
    assert_eq!(result.sources.len(), 3);
    assert!(result.sources.len() <= 5);
    assert_eq!(result.sources[0].content_type, "text");
    assert!(result.sources[0].excerpt.contains("42 requests"));

    // The single retrieved image comes back with its bytes inlined.
    assert_eq!(result.related_images.len(), 1);
    let image = &result.related_images[0];
    assert_eq!(image.description, "a throughput chart");
    let inlined = image.image_base64.as_ref().expect("inline bytes");
    assert_eq!(
        BASE64.decode(inlined).expect("decode"),
        b"throughput chart bytes"
    );
}

#[tokio::test]
async fn generation_failure_degrades_but_keeps_sources() {
    let server = MockServer::start_async().await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (service, id) = completed_document(&server, workspace.path()).await;
    mount_model_failure(&server, ANSWER_MODEL).await;

    let result = service
        .answer(id, "what was the peak throughput?", 5)
        .await
        .expect("answer");

    assert_eq!(result.diagnostics.outcome, QueryOutcome::GenerationDegraded);
    assert_eq!(result.confidence, Some(0.0));
    assert_eq!(result.sources.len(), 3);
    assert!(result.diagnostics.detail.contains("Generation failed"));
}

#[tokio::test]
async fn retrieval_failure_degrades_without_erroring() {
    let server = MockServer::start_async().await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let service = service_against(&server, workspace.path().join("images"));

    mount_qdrant_ok(&server).await;
    mount_parse(
        &server,
        json!([{ "type": "text", "text": "only chunk" }]),
    )
    .await;
    mount_model(&server, SUMMARY_MODEL, "summary").await;

    let source = write_source(workspace.path());
    let id = service.register("paper.pdf", source, 18);
    service.clone().start_processing(id).expect("start");
    wait_for_terminal(&service, id).await;

    // Search requests fail at the backend from here on.
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path_matches(Regex::new(r"/points/query$").unwrap());
            then.status(503).body("backend down");
        })
        .await;

    let result = service
        .answer(id, "anything", 5)
        .await
        .expect("answer");

    assert_eq!(result.diagnostics.outcome, QueryOutcome::RetrievalDegraded);
    assert!(result.sources.is_empty());
    assert_eq!(result.confidence, Some(0.0));
}
