mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use legal_rag::LocalModelLoader;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

#[tokio::test]
async fn test_root_reports_liveness() {
    let dir = TempDir::new().unwrap();
    let app = app(state_with(test_settings(&dir), Arc::new(FakeLoader)));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"message": "Private Legal Chat API is running"})
    );
}

#[tokio::test]
async fn test_chat_without_models_is_service_unavailable() {
    let dir = TempDir::new().unwrap();
    let app = app(state_with(test_settings(&dir), Arc::new(LocalModelLoader)));

    let response = app
        .oneshot(json_request("/chat", json!({"query": "What is the contract term?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error_type"], "service_unavailable");
}

#[tokio::test]
async fn test_missing_model_then_lazy_reinit() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let state = state_with(settings.clone(), Arc::new(FakeLoader));
    let app = app(state.clone());

    let response = app
        .clone()
        .oneshot(json_request("/chat", json!({"query": "Who is the lessee?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains(&settings.model_path().display().to_string()));
    assert!(!state.chain.is_ready().await);

    install_model(&settings);
    let response = app
        .oneshot(json_request("/chat", json!({"query": "Who is the lessee?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.chain.is_ready().await);
}

#[tokio::test]
async fn test_blank_query_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = app(state_with(test_settings(&dir), Arc::new(FakeLoader)));

    let response = app
        .oneshot(json_request("/chat", json!({"query": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_type"], "invalid_request");
}

#[tokio::test]
async fn test_ingest_then_chat_answers_from_document() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    install_model(&settings);
    let app = app(state_with(settings, Arc::new(FakeLoader)));

    let response = app
        .clone()
        .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Successfully ingested 1 files.");
    assert_eq!(body["chunks"], 1);

    let response = app
        .oneshot(json_request("/chat", json!({"query": "What is the contract term?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["result"].as_str().unwrap().contains("12 months"));

    let sources = body["source_documents"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0]["source"].as_str().unwrap().ends_with("contract.txt"));
    assert_eq!(sources[0]["page"], 0);
    assert_eq!(sources[0]["content"], "The contract term is 12 months....");
}

#[tokio::test]
async fn test_ingest_two_files_writes_both() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let source_dir = settings.paths.source_docs_dir.clone();
    let app = app(state_with(settings, Arc::new(FakeLoader)));

    let response = app
        .oneshot(multipart_request(&[
            ("nda.txt", "The receiving party shall keep all information confidential."),
            ("../lease.txt", "Rent is due on the first day of each month."),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Successfully ingested 2 files.");
    assert_eq!(body["files"], 2);

    assert!(source_dir.join("nda.txt").is_file());
    assert!(source_dir.join("lease.txt").is_file());
    assert!(!dir.path().join("data/lease.txt").exists());
}

#[tokio::test]
async fn test_reingest_accumulates_entries() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let state = state_with(settings, Arc::new(FakeLoader));
    let app = app(state.clone());

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let store = state.cache.cached_store().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_ingest_without_files_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = app(state_with(test_settings(&dir), Arc::new(FakeLoader)));

    let response = app.oneshot(multipart_request(&[])).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_stream_emits_sources_tokens_done() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    install_model(&settings);
    let app = app(state_with(settings, Arc::new(FakeLoader)));

    app.clone()
        .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request("/chat/stream", json!({"query": "What is the contract term?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;

    let sources_at = text.find("event: sources").unwrap();
    let token_at = text.find("event: token").unwrap();
    let done_at = text.find("event: done").unwrap();
    assert!(sources_at < token_at && token_at < done_at);
    assert!(text.contains("contract.txt"));

    let streamed: String = text
        .split("\n\n")
        .filter(|event| event.contains("event: token"))
        .filter_map(|event| event.lines().find_map(|l| l.strip_prefix("data: ")))
        .collect();
    assert!(streamed.contains("12"));
}

#[tokio::test]
async fn test_status_reflects_readiness() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let app = app(state_with(settings.clone(), Arc::new(FakeLoader)));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["chain_ready"], false);
    assert_eq!(body["model_present"], false);
    assert!(body["indexed_chunks"].is_null());

    install_model(&settings);
    app.clone()
        .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["chain_ready"], true);
    assert_eq!(body["model_present"], true);
    assert_eq!(body["indexed_chunks"], 1);
}

#[tokio::test]
async fn test_chat_generation_failure_is_internal_error() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    install_model(&settings);
    let app = app(state_with(settings, Arc::new(BrokenLlmLoader)));

    app.clone()
        .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request("/chat", json!({"query": "What is the contract term?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error_type"], "internal_error");
    assert!(body["message"].as_str().unwrap().contains(BROKEN_LLM_MESSAGE));
}

#[tokio::test]
async fn test_chat_stream_generation_failure_sends_error_event() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    install_model(&settings);
    let app = app(state_with(settings, Arc::new(BrokenLlmLoader)));

    app.clone()
        .oneshot(multipart_request(&[("contract.txt", "The contract term is 12 months.")]))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request("/chat/stream", json!({"query": "What is the contract term?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;

    let sources_at = text.find("event: sources").unwrap();
    let error_at = text.find("event: error").unwrap();
    assert!(sources_at < error_at);
    assert!(text.contains(BROKEN_LLM_MESSAGE));
    assert!(!text.contains("event: done"));
}
