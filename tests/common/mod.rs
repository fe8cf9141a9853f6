//! Shared harness for integration tests: a `DocumentService` wired entirely against one
//! httpmock server (parser, model endpoints, and Qdrant all live there), a deterministic
//! embedder, and no pacing delays.
#![allow(dead_code)]

use docrag::document::{DocumentId, StatusSnapshot};
use docrag::embedding::DeterministicEmbeddingClient;
use docrag::extraction::{HttpStructureParser, ParseOptions};
use docrag::generation::HttpGenerationClient;
use docrag::pipeline::{DocumentService, ExternalClients, RatePolicy, ServiceSettings};
use docrag::qdrant::QdrantService;
use docrag::summarization::HttpSummarizationClient;
use docrag::vision::HttpVisionClient;
use httpmock::{Method::POST, Method::PUT, Mock, MockServer};
use regex::Regex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const SUMMARY_MODEL: &str = "summary-model";
pub const VISION_MODEL: &str = "vision-model";
pub const ANSWER_MODEL: &str = "answer-model";

pub fn service_against(server: &MockServer, images_dir: PathBuf) -> Arc<DocumentService> {
    let clients = ExternalClients {
        parser: Arc::new(HttpStructureParser::new(server.base_url())),
        summarizer: Arc::new(HttpSummarizationClient::new(
            server.base_url(),
            SUMMARY_MODEL.into(),
        )),
        vision: Arc::new(HttpVisionClient::new(server.base_url(), VISION_MODEL.into())),
        generator: Arc::new(HttpGenerationClient::new(
            server.base_url(),
            ANSWER_MODEL.into(),
        )),
        embedder: Arc::new(DeterministicEmbeddingClient::new(8)),
        qdrant: Arc::new(QdrantService::new(&server.base_url(), None).expect("qdrant client")),
    };
    let settings = ServiceSettings {
        images_dir,
        parse_options: ParseOptions {
            high_fidelity: true,
            infer_table_structure: true,
            extract_images: true,
            max_chunk_chars: 4000,
            combine_text_under_chars: 1000,
            new_chunk_after_chars: 3000,
        },
        rate_policy: RatePolicy {
            batch_size: 15,
            cooldown: Duration::ZERO,
            delay: Duration::ZERO,
        },
        summary_concurrency: 3,
        score_threshold: None,
        context_excerpt_chars: 1000,
        source_excerpt_chars: 500,
    };
    Arc::new(DocumentService::new(clients, settings))
}

/// Write a fake source document and return its path.
pub fn write_source(dir: &Path) -> PathBuf {
    let path = dir.join("doc.pdf");
    std::fs::write(&path, b"%PDF-1.7 fake body").expect("write source");
    path
}

/// Accept any collection create/delete and point upsert.
pub async fn mount_qdrant_ok(server: &MockServer) -> (Mock<'_>, Mock<'_>) {
    let collections = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path_matches(Regex::new(r"^/collections/doc_[0-9a-f]+$").unwrap());
            then.status(200).json_body(json!({ "status": "ok" }));
        })
        .await;
    let points = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path_matches(Regex::new(r"/points$").unwrap());
            then.status(200).json_body(json!({ "status": "ok" }));
        })
        .await;
    (collections, points)
}

/// Mount the structure-parser response.
pub async fn mount_parse(server: &MockServer, elements: Value) -> Mock<'_> {
    server
        .mock_async(move |when, then| {
            when.method(POST).path("/parse");
            then.status(200).json_body(json!({ "elements": elements }));
        })
        .await
}

/// Mount a successful model endpoint for the given model name.
pub async fn mount_model<'a>(server: &'a MockServer, model: &str, response: &str) -> Mock<'a> {
    let body = format!(r#"{{"model": "{model}"}}"#);
    let response = response.to_string();
    server
        .mock_async(move |when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(body);
            then.status(200)
                .json_body(json!({ "response": response, "done": true }));
        })
        .await
}

/// Mount a failing model endpoint for the given model name.
pub async fn mount_model_failure<'a>(server: &'a MockServer, model: &str) -> Mock<'a> {
    let body = format!(r#"{{"model": "{model}"}}"#);
    server
        .mock_async(move |when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(body);
            then.status(500).body("model unavailable");
        })
        .await
}

/// Poll until the document reaches a terminal state.
pub async fn wait_for_terminal(service: &DocumentService, id: DocumentId) -> StatusSnapshot {
    for _ in 0..500 {
        let snapshot = service.get_status(id).expect("status");
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("document {id} did not reach a terminal state");
}
