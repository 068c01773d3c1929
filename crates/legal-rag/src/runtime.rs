//! Component graph: embedder → store → retriever → language model → chain.
//!
//! Heavy resources are cached in `ModelCache` so rebuilding the chain after an
//! ingest reuses the loaded models and the open store.

use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{LlmSettings, Settings};
use crate::embeddings::{EmbeddingModel, MiniLmConfig, MiniLmEmbeddings};
use crate::error::{RagError, RagResult};
use crate::indexing::Ingestor;
use crate::llm::{GenerationConfig, LLMProvider, LlamaCppProvider};
use crate::rag::{RagChain, Retriever};
use crate::storage::LanceStore;

/// Constructs the model-backed components. Both calls block while weights load.
pub trait ModelLoader: Send + Sync {
    fn load_embedder(&self, settings: &Settings) -> RagResult<Arc<dyn EmbeddingModel>>;

    fn load_llm(&self, model_path: &Path, settings: &LlmSettings) -> RagResult<Arc<dyn LLMProvider>>;
}

/// ONNX MiniLM embeddings and a llama.cpp GGUF model from `paths.models_dir`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalModelLoader;

impl ModelLoader for LocalModelLoader {
    fn load_embedder(&self, settings: &Settings) -> RagResult<Arc<dyn EmbeddingModel>> {
        let embeddings = MiniLmEmbeddings::new(MiniLmConfig::from_settings(settings))?;
        Ok(Arc::new(embeddings))
    }

    fn load_llm(&self, model_path: &Path, settings: &LlmSettings) -> RagResult<Arc<dyn LLMProvider>> {
        let provider = LlamaCppProvider::load(model_path, settings)?;
        Ok(Arc::new(provider))
    }
}

/// Lazily constructed, process-lifetime resources.
#[derive(Default)]
pub struct ModelCache {
    embedder: Mutex<Option<Arc<dyn EmbeddingModel>>>,
    store: Mutex<Option<(PathBuf, Arc<LanceStore>)>>,
    llm: Mutex<Option<(PathBuf, Arc<dyn LLMProvider>)>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn embedder(
        &self,
        settings: &Settings,
        loader: &Arc<dyn ModelLoader>,
    ) -> RagResult<Arc<dyn EmbeddingModel>> {
        let mut slot = self.embedder.lock().await;
        if let Some(embedder) = slot.as_ref() {
            return Ok(Arc::clone(embedder));
        }

        let loader = Arc::clone(loader);
        let settings_owned = settings.clone();
        let embedder = tokio::task::spawn_blocking(move || loader.load_embedder(&settings_owned))
            .await
            .map_err(|e| anyhow!("Embedder load task panicked: {}", e))??;

        *slot = Some(Arc::clone(&embedder));
        Ok(embedder)
    }

    pub async fn store(&self, settings: &Settings, dimension: usize) -> RagResult<Arc<LanceStore>> {
        let path = settings.paths.vector_store_dir.clone();
        let mut slot = self.store.lock().await;
        if let Some((cached_path, store)) = slot.as_ref() {
            if *cached_path == path && store.dimension() == dimension {
                return Ok(Arc::clone(store));
            }
        }

        let store = Arc::new(LanceStore::open(&path, dimension, settings.search.metric).await?);
        *slot = Some((path, Arc::clone(&store)));
        Ok(store)
    }

    /// The language model for `settings.model_path()`, loaded once per path.
    pub async fn llm(
        &self,
        settings: &Settings,
        loader: &Arc<dyn ModelLoader>,
    ) -> RagResult<Arc<dyn LLMProvider>> {
        let path = settings.model_path();
        let mut slot = self.llm.lock().await;
        if let Some((cached_path, llm)) = slot.as_ref() {
            if *cached_path == path {
                return Ok(Arc::clone(llm));
            }
        }
        if !path.is_file() {
            return Err(RagError::ModelNotFound(path));
        }

        let loader = Arc::clone(loader);
        let llm_settings = settings.llm.clone();
        let load_path = path.clone();
        let llm = tokio::task::spawn_blocking(move || loader.load_llm(&load_path, &llm_settings))
            .await
            .map_err(|e| anyhow!("Model load task panicked: {}", e))??;

        *slot = Some((path, Arc::clone(&llm)));
        Ok(llm)
    }

    pub async fn is_llm_loaded(&self) -> bool {
        self.llm.lock().await.is_some()
    }

    /// The open store, if any component has opened it yet.
    pub async fn cached_store(&self) -> Option<Arc<LanceStore>> {
        self.store.lock().await.as_ref().map(|(_, store)| Arc::clone(store))
    }
}

/// A ready chain together with the resources it was built from.
pub struct Components {
    pub embedder: Arc<dyn EmbeddingModel>,
    pub store: Arc<LanceStore>,
    pub chain: Arc<RagChain>,
}

impl Components {
    pub async fn build(
        settings: &Settings,
        loader: &Arc<dyn ModelLoader>,
        cache: &ModelCache,
    ) -> RagResult<Self> {
        let embedder = cache.embedder(settings, loader).await?;
        let store = cache.store(settings, embedder.dimension()).await?;
        let retriever = Retriever::new(Arc::clone(&embedder), Arc::clone(&store), settings.search.k)?;
        let llm = cache.llm(settings, loader).await?;
        let chain = RagChain::new(retriever, llm, GenerationConfig::from(&settings.llm));

        tracing::info!(
            embedder = %embedder.model_name(),
            model = %settings.model_path().display(),
            k = settings.search.k,
            "RAG chain ready"
        );
        Ok(Self {
            embedder,
            store,
            chain: Arc::new(chain),
        })
    }

    /// Ingestion only needs the embedder and the store.
    pub async fn ingestor(
        settings: &Settings,
        loader: &Arc<dyn ModelLoader>,
        cache: &ModelCache,
    ) -> RagResult<Ingestor> {
        let embedder = cache.embedder(settings, loader).await?;
        let store = cache.store(settings, embedder.dimension()).await?;
        Ingestor::from_settings(settings, embedder, store)
    }
}
