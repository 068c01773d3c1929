#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use legal_chat_server::{create_app, AppState};
use legal_rag::config::LlmSettings;
use legal_rag::{
    EmbeddingModel, GenerationConfig, LLMProvider, ModelLoader, ProviderInfo, RagResult, Settings,
    TokenStream,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const BOUNDARY: &str = "legal-chat-test-boundary";

/// Hashed bag-of-words vectors; same words, same vector.
pub struct WordHashEmbedder {
    dimension: usize,
}

impl EmbeddingModel for WordHashEmbedder {
    fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_document(text)
    }

    fn embed_document(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "word-hash"
    }
}

/// Replies with the context block of the prompt.
pub struct EchoContextLlm;

impl EchoContextLlm {
    fn reply(prompt: &str) -> String {
        let context = prompt
            .split_once("Context: ")
            .and_then(|(_, rest)| rest.split_once("\n\nQuestion:"))
            .map(|(context, _)| context.trim().to_string())
            .unwrap_or_default();
        if context.is_empty() {
            "I don't know.".to_string()
        } else {
            format!("Based on the documents: {}", context)
        }
    }
}

#[async_trait]
impl LLMProvider for EchoContextLlm {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
        Ok(Self::reply(prompt))
    }

    async fn generate_stream(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<TokenStream> {
        Ok(TokenStream::from_fragments(
            Self::reply(prompt).split_inclusive(' ').map(str::to_string),
        ))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "echo".to_string(),
            model: "echo-context".to_string(),
            context_window: 4096,
            supports_streaming: true,
            is_local: true,
        }
    }
}

/// Fails every generation; streams emit one fragment before the failure.
pub struct BrokenLlm;

pub const BROKEN_LLM_MESSAGE: &str = "llama context exhausted";

#[async_trait]
impl LLMProvider for BrokenLlm {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
        Err(anyhow::anyhow!(BROKEN_LLM_MESSAGE))
    }

    async fn generate_stream(&self, _prompt: &str, _config: &GenerationConfig) -> anyhow::Result<TokenStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Ok("The contract ".to_string())).await?;
        tx.send(Err(anyhow::anyhow!(BROKEN_LLM_MESSAGE))).await?;
        Ok(TokenStream::new(rx))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "broken".to_string(),
            model: "broken".to_string(),
            context_window: 4096,
            supports_streaming: true,
            is_local: true,
        }
    }
}

pub struct FakeLoader;

impl ModelLoader for FakeLoader {
    fn load_embedder(&self, settings: &Settings) -> RagResult<Arc<dyn EmbeddingModel>> {
        Ok(Arc::new(WordHashEmbedder {
            dimension: settings.embedding.dimension,
        }))
    }

    fn load_llm(&self, _model_path: &Path, _settings: &LlmSettings) -> RagResult<Arc<dyn LLMProvider>> {
        Ok(Arc::new(EchoContextLlm))
    }
}

/// Real embedder fake, generation always fails.
pub struct BrokenLlmLoader;

impl ModelLoader for BrokenLlmLoader {
    fn load_embedder(&self, settings: &Settings) -> RagResult<Arc<dyn EmbeddingModel>> {
        FakeLoader.load_embedder(settings)
    }

    fn load_llm(&self, _model_path: &Path, _settings: &LlmSettings) -> RagResult<Arc<dyn LLMProvider>> {
        Ok(Arc::new(BrokenLlm))
    }
}

pub fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    let data = dir.path().join("data");
    settings.paths.source_docs_dir = data.join("source_docs");
    settings.paths.vector_store_dir = data.join("vector_store");
    settings.paths.data_dir = data;
    settings.paths.models_dir = dir.path().join("models");
    settings.embedding.dimension = 64;
    settings
}

/// Put a placeholder GGUF file where the settings expect the model.
pub fn install_model(settings: &Settings) {
    std::fs::create_dir_all(&settings.paths.models_dir).unwrap();
    std::fs::write(settings.model_path(), b"GGUF").unwrap();
}

pub fn state_with(settings: Settings, loader: Arc<dyn ModelLoader>) -> AppState {
    AppState::new(settings, loader)
}

pub fn app(state: AppState) -> axum::Router {
    create_app(state)
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn multipart_request(files: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/ingest")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
