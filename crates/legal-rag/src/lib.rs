pub mod config;
pub mod embeddings;
pub mod error;
pub mod indexing;
pub mod llm;
pub mod processing;
pub mod rag;
pub mod runtime;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use config::{DistanceMetric, ReingestPolicy, Settings};
pub use error::{RagError, RagResult};
pub use indexing::{IngestReport, Ingestor};
pub use rag::{PromptTemplate, RagChain, Retriever};
pub use runtime::{Components, LocalModelLoader, ModelCache, ModelLoader};
pub use storage::LanceStore;
pub use types::{Answer, DocumentChunk, RawDocument, ScoredChunk, SourceExcerpt};

// Re-export LLM types
pub use embeddings::EmbeddingModel;
pub use llm::{GenerationConfig, LLMProvider, ProviderInfo, TokenStream};
