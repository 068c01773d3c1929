//! Deterministic stand-ins for the model-backed components.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embeddings::EmbeddingModel;
use crate::llm::{GenerationConfig, LLMProvider, ProviderInfo, TokenStream};

/// Bag-of-words embedder: each lowercase word bumps a hashed bucket.
pub struct KeywordEmbedder {
    dimension: usize,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl EmbeddingModel for KeywordEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_document(text)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
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
        "keyword-test"
    }
}

/// Answers by repeating the context section of the prompt.
pub struct ContextEchoLlm;

impl ContextEchoLlm {
    fn reply(prompt: &str) -> String {
        let context = prompt
            .split_once("Context: ")
            .and_then(|(_, rest)| rest.split_once("\n\nQuestion:"))
            .map(|(context, _)| context.trim())
            .unwrap_or_default();
        if context.is_empty() {
            "I don't know.".to_string()
        } else {
            format!("According to the documents: {}", context)
        }
    }
}

#[async_trait]
impl LLMProvider for ContextEchoLlm {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
        Ok(Self::reply(prompt))
    }

    async fn generate_stream(&self, prompt: &str, _config: &GenerationConfig) -> Result<TokenStream> {
        let reply = Self::reply(prompt);
        Ok(TokenStream::from_fragments(
            reply.split_inclusive(' ').map(str::to_string),
        ))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "echo".to_string(),
            model: "context-echo".to_string(),
            context_window: 4096,
            supports_streaming: true,
            is_local: true,
        }
    }
}

pub struct FailingLlm;

#[async_trait]
impl LLMProvider for FailingLlm {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
        Err(anyhow!("llama context exhausted"))
    }

    async fn generate_stream(&self, _prompt: &str, _config: &GenerationConfig) -> Result<TokenStream> {
        Err(anyhow!("llama context exhausted"))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "failing".to_string(),
            model: "none".to_string(),
            context_window: 0,
            supports_streaming: false,
            is_local: true,
        }
    }
}
