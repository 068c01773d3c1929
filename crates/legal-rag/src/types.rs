use serde::{Deserialize, Serialize};
use std::path::Path;

/// Characters of chunk text kept in a citation excerpt.
pub const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentFormat {
    PDF,
    TXT,
}

impl DocumentFormat {
    /// Supported formats only; anything else is skipped by the loader.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::PDF),
            "txt" => Some(Self::TXT),
            _ => None,
        }
    }
}

/// One loader record: a PDF page or a whole text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub text: String,
    pub source_path: String,
    /// Zero-based page for PDFs, 0 for formats without pages.
    pub page_number: u32,
}

/// A bounded excerpt of a source document, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source_path: String,
    pub page_number: u32,
    pub chunk_index: u32,
}

/// A chunk returned by a nearest-neighbour query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// Raw metric distance; smaller is nearer.
    pub distance: f32,
    /// Insertion sequence, used to break distance ties.
    pub seq: u64,
}

/// Citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceExcerpt {
    pub source: String,
    pub page: u32,
    pub content: String,
}

impl SourceExcerpt {
    pub fn from_chunk(chunk: &DocumentChunk) -> Self {
        Self {
            source: chunk.source_path.clone(),
            page: chunk.page_number,
            content: excerpt(&chunk.text),
        }
    }
}

/// First `EXCERPT_CHARS` characters followed by an ellipsis.
pub fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}

/// Result of one chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<SourceExcerpt>,
}

/// Internal chunk record for storage operations
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub seq: u64,
    pub source: String,
    pub page: u32,
    pub chunk_index: u32,
    pub text: String,
    pub vector: Vec<f32>,
    pub created_at: i64,
}
