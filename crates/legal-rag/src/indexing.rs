//! Ingestion pipeline: load, split, embed, store.
//!
//! Every record of a call is embedded before the store is touched, so a load
//! or embedding failure leaves the index as it was. Under `Replace` the new
//! rows are committed before the superseded ones are removed.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ReingestPolicy, Settings};
use crate::embeddings::EmbeddingModel;
use crate::error::{RagError, RagResult};
use crate::processing::{DocumentLoader, TextChunker};
use crate::storage::LanceStore;
use crate::types::{DocumentChunk, RawDocument};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Loader records (PDF pages, text files).
    pub documents: usize,
    pub chunks: usize,
    /// Distinct source files that produced records.
    pub files: usize,
    pub duration_ms: u64,
}

pub struct Ingestor {
    loader: DocumentLoader,
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingModel>,
    store: Arc<LanceStore>,
    policy: ReingestPolicy,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingModel>,
        store: Arc<LanceStore>,
        chunker: TextChunker,
        policy: ReingestPolicy,
        batch_size: usize,
    ) -> RagResult<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: store.dimension(),
                found: embedder.dimension(),
            });
        }
        Ok(Self {
            loader: DocumentLoader::new(),
            chunker,
            embedder,
            store,
            policy,
            batch_size: batch_size.max(1),
        })
    }

    pub fn from_settings(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingModel>,
        store: Arc<LanceStore>,
    ) -> RagResult<Self> {
        Self::new(
            embedder,
            store,
            TextChunker::new(settings.chunking.chunk_size, settings.chunking.chunk_overlap),
            settings.ingest.reingest,
            settings.ingest.embed_batch_size,
        )
    }

    /// Ingest every supported file below `dir`.
    pub async fn ingest_directory(&self, dir: &Path) -> RagResult<IngestReport> {
        tracing::info!(dir = %dir.display(), "Loading documents");
        let documents = self.loader.load_directory(dir)?;
        self.ingest_documents(documents).await
    }

    /// Ingest exactly the given files.
    pub async fn ingest_files(&self, paths: &[PathBuf]) -> RagResult<IngestReport> {
        let mut documents = Vec::new();
        for path in paths {
            documents.extend(self.loader.load_file(path)?);
        }
        self.ingest_documents(documents).await
    }

    async fn ingest_documents(&self, documents: Vec<RawDocument>) -> RagResult<IngestReport> {
        let started = Instant::now();
        if documents.is_empty() {
            tracing::warn!("No documents found");
            return Ok(IngestReport::default());
        }

        let sources: BTreeSet<String> = documents.iter().map(|d| d.source_path.clone()).collect();
        tracing::info!(records = documents.len(), files = sources.len(), "Loaded documents");

        let chunks = self.chunker.split_documents(&documents);
        tracing::info!(chunks = chunks.len(), "Split into chunks");

        let vectors = self.embed_chunks(&chunks).await?;

        let chunk_count = chunks.len();
        let entries = vectors.into_iter().zip(chunks).collect();
        match self.policy {
            ReingestPolicy::Accumulate => self.store.upsert(entries).await?,
            ReingestPolicy::Replace => self.store.replace_sources(&sources, entries).await?,
        };

        let report = IngestReport {
            documents: documents.len(),
            chunks: chunk_count,
            files: sources.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            files = report.files,
            duration_ms = report.duration_ms,
            "Ingestion complete"
        );
        Ok(report)
    }

    async fn embed_chunks(&self, chunks: &[DocumentChunk]) -> RagResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let embedded = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                embedder.embed_documents(&refs)
            })
            .await
            .map_err(|e| anyhow!("Embedding task panicked: {}", e))??;

            if embedded.len() != batch.len() {
                return Err(RagError::Other(anyhow!(
                    "embedder returned {} vectors for {} chunks",
                    embedded.len(),
                    batch.len()
                )));
            }
            tracing::debug!(batch = batch_no, size = batch.len(), "Embedded batch");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}
