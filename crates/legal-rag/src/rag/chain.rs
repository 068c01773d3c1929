use std::sync::Arc;
use std::time::Instant;

use super::prompt::PromptTemplate;
use super::retriever::Retriever;
use crate::error::{RagError, RagResult};
use crate::llm::{GenerationConfig, LLMProvider, ProviderInfo, TokenStream};
use crate::types::{Answer, ScoredChunk, SourceExcerpt};

/// Retrieval, prompt assembly and generation over one store and one model.
pub struct RagChain {
    retriever: Retriever,
    llm: Arc<dyn LLMProvider>,
    generation: GenerationConfig,
    prompt: PromptTemplate,
}

impl RagChain {
    pub fn new(retriever: Retriever, llm: Arc<dyn LLMProvider>, generation: GenerationConfig) -> Self {
        Self {
            retriever,
            llm,
            generation,
            prompt: PromptTemplate::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub async fn answer(&self, question: &str) -> RagResult<Answer> {
        let started = Instant::now();
        let (prompt, hits) = self.prepare(question).await?;

        let completion = self
            .llm
            .generate(&prompt, &self.generation)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        tracing::info!(
            sources = hits.len(),
            answer_chars = completion.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(Answer {
            query: question.to_string(),
            answer: completion.trim().to_string(),
            sources: sources_of(&hits),
        })
    }

    /// Sources are known before the first token, so they are returned next
    /// to the stream.
    pub async fn answer_stream(&self, question: &str) -> RagResult<(Vec<SourceExcerpt>, TokenStream)> {
        let (prompt, hits) = self.prepare(question).await?;
        let stream = self
            .llm
            .generate_stream(&prompt, &self.generation)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;
        Ok((sources_of(&hits), stream))
    }

    async fn prepare(&self, question: &str) -> RagResult<(String, Vec<ScoredChunk>)> {
        let hits = self.retriever.retrieve(question).await?;
        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok((self.prompt.render(&context, question), hits))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn llm_info(&self) -> ProviderInfo {
        self.llm.info()
    }
}

fn sources_of(hits: &[ScoredChunk]) -> Vec<SourceExcerpt> {
    hits.iter().map(|hit| SourceExcerpt::from_chunk(&hit.chunk)).collect()
}
