use anyhow::anyhow;
use std::sync::Arc;

use crate::embeddings::EmbeddingModel;
use crate::error::{RagError, RagResult};
use crate::storage::LanceStore;
use crate::types::ScoredChunk;

/// Embeds a question and fetches its nearest chunks.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingModel>,
    store: Arc<LanceStore>,
    k: usize,
}

impl Retriever {
    /// The embedder must be the one the store was filled with.
    pub fn new(embedder: Arc<dyn EmbeddingModel>, store: Arc<LanceStore>, k: usize) -> RagResult<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: store.dimension(),
                found: embedder.dimension(),
            });
        }
        Ok(Self { embedder, store, k })
    }

    pub async fn retrieve(&self, question: &str) -> RagResult<Vec<ScoredChunk>> {
        let embedder = Arc::clone(&self.embedder);
        let question = question.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_query(&question))
            .await
            .map_err(|e| anyhow!("Query embedding task panicked: {}", e))??;
        let hits = self.store.query(&vector, self.k).await?;
        tracing::debug!(k = self.k, hits = hits.len(), "Retrieved context chunks");
        Ok(hits)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn store(&self) -> &Arc<LanceStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistanceMetric;
    use crate::testing::KeywordEmbedder;
    use crate::types::DocumentChunk;
    use parking_lot::Mutex;
    use std::thread::ThreadId;
    use tempfile::TempDir;

    /// Records the thread each query embedding ran on.
    struct ThreadRecordingEmbedder {
        inner: KeywordEmbedder,
        query_thread: Mutex<Option<ThreadId>>,
    }

    impl EmbeddingModel for ThreadRecordingEmbedder {
        fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            *self.query_thread.lock() = Some(std::thread::current().id());
            self.inner.embed_query(text)
        }

        fn embed_document(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.inner.embed_document(text)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            "thread-recording"
        }
    }

    #[tokio::test]
    async fn test_query_embedding_runs_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            LanceStore::open(&dir.path().join("vs"), 32, DistanceMetric::Cosine)
                .await
                .unwrap(),
        );
        let embedder = Arc::new(ThreadRecordingEmbedder {
            inner: KeywordEmbedder::new(32),
            query_thread: Mutex::new(None),
        });
        let text = "The contract term is 12 months.";
        store
            .upsert(vec![(
                embedder.embed_document(text).unwrap(),
                DocumentChunk {
                    text: text.to_string(),
                    source_path: "contract.txt".to_string(),
                    page_number: 0,
                    chunk_index: 0,
                },
            )])
            .await
            .unwrap();

        let retriever = Retriever::new(embedder.clone(), store, 3).unwrap();
        let hits = retriever.retrieve("contract term").await.unwrap();
        assert_eq!(hits.len(), 1);

        // The test body runs on the single runtime thread.
        let recorded = embedder.query_thread.lock().unwrap();
        assert_ne!(recorded, std::thread::current().id());
    }
}
