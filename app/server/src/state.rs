use legal_rag::{Components, ModelCache, ModelLoader, RagChain, RagResult, Settings};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// The chain currently serving requests. Readers clone the `Arc` and drop the
/// lock before generating, so a swap never waits on a running answer.
#[derive(Clone, Default)]
pub struct ChainHandle {
    inner: Arc<RwLock<Option<Arc<RagChain>>>>,
}

impl ChainHandle {
    pub async fn get(&self) -> Option<Arc<RagChain>> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, chain: Arc<RagChain>) {
        *self.inner.write().await = Some(chain);
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub loader: Arc<dyn ModelLoader>,
    pub cache: Arc<ModelCache>,
    pub chain: ChainHandle,
    /// Serializes ingestion runs.
    pub ingest_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(settings: Settings, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            settings: Arc::new(settings),
            loader,
            cache: Arc::new(ModelCache::new()),
            chain: ChainHandle::default(),
            ingest_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build the chain from the current resources and make it current.
    pub async fn rebuild_chain(&self) -> RagResult<Arc<RagChain>> {
        let components = Components::build(&self.settings, &self.loader, &self.cache).await?;
        self.chain.set(Arc::clone(&components.chain)).await;
        Ok(components.chain)
    }

    /// The current chain, constructing it first when no chain exists yet.
    pub async fn chain_or_init(&self) -> RagResult<Arc<RagChain>> {
        if let Some(chain) = self.chain.get().await {
            return Ok(chain);
        }
        tracing::info!("RAG chain not initialized, attempting construction");
        self.rebuild_chain().await
    }

    /// Startup attempt; missing models only leave the chain unset.
    pub async fn try_init(&self) {
        match self.rebuild_chain().await {
            Ok(_) => tracing::info!("RAG chain initialized at startup"),
            Err(e) if e.is_unavailable() => {
                tracing::warn!("RAG chain not initialized: {}", e)
            }
            Err(e) => tracing::error!("Failed to initialize RAG chain: {}", e),
        }
    }
}
