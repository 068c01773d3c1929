use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the RAG engine to its callers.
///
/// Resource errors (`ModelNotFound`, `EmbeddingUnavailable`, `StoreUnavailable`)
/// mean a dependency of the chain could not be constructed yet; callers are
/// expected to retry construction on a later request rather than give up.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(
        "Model file not found at {0}. Please download the GGUF model and place it in the models directory."
    )]
    ModelNotFound(PathBuf),

    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Embedding dimension mismatch: store expects {expected}, got {found}. Rebuild the vector store after changing embedding models.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to load document {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// True for errors caused by a missing or unloadable resource.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_) | Self::EmbeddingUnavailable(_) | Self::StoreUnavailable(_)
        )
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
