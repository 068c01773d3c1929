pub mod minilm;

pub use minilm::{MiniLmConfig, MiniLmEmbeddings};

use anyhow::Result;

/// Unified embedding model trait
pub trait EmbeddingModel: Send + Sync {
    /// Embed a search query
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a document chunk
    fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed documents for ingestion. Either every text is embedded or
    /// the call fails.
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_document(t)).collect()
    }

    /// Embedding vector dimension
    fn dimension(&self) -> usize;

    /// Name of the pretrained model, e.g. `all-MiniLM-L6-v2`.
    fn model_name(&self) -> &str;
}
