use axum::extract::{Multipart, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use legal_rag::{Components, SourceExcerpt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub app_name: String,
    pub version: String,
    pub chain_ready: bool,
    pub model_path: String,
    pub model_present: bool,
    /// Unknown until the vector store has been opened.
    pub indexed_chunks: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub result: String,
    pub source_documents: Vec<SourceExcerpt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub files: usize,
    pub chunks: usize,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Private Legal Chat API is running".to_string(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let model_path = state.settings.model_path();
    let indexed_chunks = match state.cache.cached_store().await {
        Some(store) => store.count().await.ok(),
        None => None,
    };

    Json(StatusResponse {
        app_name: state.settings.app_name.clone(),
        version: state.settings.app_version.clone(),
        chain_ready: state.chain.is_ready().await,
        model_present: model_path.is_file(),
        model_path: model_path.display().to_string(),
        indexed_chunks,
    })
}

fn validate_query(query: &str) -> Result<&str, ApiError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::InvalidRequest("query must not be empty".to_string()));
    }
    Ok(query)
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let query = validate_query(&request.query)?;
    tracing::info!(query = %query, "Chat request");

    let chain = state.chain_or_init().await?;
    let answer = chain.answer(query).await?;

    Ok(Json(ChatResponse {
        result: answer.answer,
        source_documents: answer.sources,
    }))
}

/// Server-sent events: one `sources` event, `token` events, then `done`.
/// A generation failure is reported as an `error` event and ends the stream.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    let query = validate_query(&request.query)?;
    tracing::info!(query = %query, "Streaming chat request");

    let chain = state.chain_or_init().await?;
    let (sources, mut tokens) = chain.answer_stream(query).await?;
    let sources_event = Event::default()
        .event("sources")
        .json_data(&sources)
        .map_err(|e| ApiError::InternalError(format!("failed to encode sources: {}", e)))?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(async move {
        if tx.send(Ok(sources_event)).await.is_err() {
            return;
        }
        while let Some(token) = tokens.next().await {
            let event = match token {
                Ok(text) => Event::default().event("token").data(text),
                Err(e) => {
                    tracing::error!("Streaming generation failed: {}", e);
                    let _ = tx.send(Ok(Event::default().event("error").data(e.to_string()))).await;
                    return;
                }
            };
            // Client went away; dropping `tokens` stops generation.
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Ok(Event::default().event("done").data("[DONE]"))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Reduce an uploaded name to a bare file name inside the source directory.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let base = Path::new(&normalized).file_name()?.to_str()?.trim();
    if base.is_empty() || base.starts_with('.') {
        return None;
    }
    Some(base.to_string())
}

pub async fn ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let source_dir = state.settings.paths.source_docs_dir.clone();
    std::fs::create_dir_all(&source_dir)
        .map_err(|e| ApiError::InternalError(format!("cannot create {}: {}", source_dir.display(), e)))?;

    let mut saved: Vec<PathBuf> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(sanitize_filename)
            .ok_or_else(|| ApiError::InvalidRequest("uploaded file has no usable name".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("failed to read {}: {}", file_name, e)))?;

        let path = source_dir.join(&file_name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::InternalError(format!("failed to save {}: {}", file_name, e)))?;
        tracing::info!(file = %path.display(), bytes = data.len(), "Saved upload");
        saved.push(path);
    }

    if saved.is_empty() {
        return Err(ApiError::InvalidRequest("no files uploaded".to_string()));
    }

    let _guard = state.ingest_lock.lock().await;
    let ingestor = Components::ingestor(&state.settings, &state.loader, &state.cache).await?;
    let report = ingestor.ingest_directory(&source_dir).await?;

    // Refresh the chain so it picks up the new data; the model stays cached.
    if let Err(e) = state.rebuild_chain().await {
        tracing::warn!("Ingested documents but the RAG chain is not ready: {}", e);
    }

    Ok(Json(IngestResponse {
        message: format!("Successfully ingested {} files.", saved.len()),
        files: saved.len(),
        chunks: report.chunks,
    }))
}
