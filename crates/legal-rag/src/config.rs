use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{RagError, RagResult};

/// Environment variable pointing at an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "LEGAL_RAG_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub paths: PathSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub search: SearchSettings,
    pub ingest: IngestSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub source_docs_dir: PathBuf,
    pub vector_store_dir: PathBuf,
    pub models_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// GGUF file name inside `paths.models_dir`.
    pub model_filename: String,
    pub n_ctx: u32,
    /// Layers offloaded to the GPU; negative offloads every layer, 0 is CPU only.
    pub n_gpu_layers: i32,
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: f32,
    pub top_k: usize,
    pub repetition_penalty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Directory name of the sentence-transformer export inside `paths.models_dir`.
    pub model_name: String,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub k: usize,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub reingest: ReingestPolicy,
    pub embed_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Similarity metric used by the vector store. Must stay the same for the
/// lifetime of a store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
}

/// What happens to existing entries when a source file is ingested again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReingestPolicy {
    /// Append new entries next to the old ones.
    Accumulate,
    /// Drop every entry of the source before inserting the new ones.
    Replace,
}

impl FromStr for DistanceMetric {
    type Err = RagError;

    fn from_str(s: &str) -> RagResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            other => Err(RagError::Config(format!("unknown distance metric '{}'", other))),
        }
    }
}

impl FromStr for ReingestPolicy {
    type Err = RagError;

    fn from_str(s: &str) -> RagResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "accumulate" => Ok(Self::Accumulate),
            "replace" => Ok(Self::Replace),
            other => Err(RagError::Config(format!("unknown reingest policy '{}'", other))),
        }
    }
}

impl Settings {
    /// Resolve settings once at startup: defaults, then the JSON file named by
    /// `LEGAL_RAG_CONFIG` (or `./config.json` when present), then environment.
    pub fn load() -> RagResult<Self> {
        let file = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let local = PathBuf::from("config.json");
                local.exists().then_some(local)
            });

        let mut settings = match file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading settings file");
                Self::read_file(&path)?
            }
            None => Self::default(),
        };

        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> RagResult<Self> {
        let settings = Self::read_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_file(path: &Path) -> RagResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| RagError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Apply overrides using the variable names of the original deployment
    /// (`MODEL_FILENAME`, `N_CTX`, `CHUNK_SIZE`, ...). `lookup` abstracts the
    /// environment so tests can feed their own values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> RagResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DATA_DIR") {
            let data_dir = PathBuf::from(dir);
            self.paths.source_docs_dir = data_dir.join("source_docs");
            self.paths.vector_store_dir = data_dir.join("vector_store");
            self.paths.data_dir = data_dir;
        }
        if let Some(dir) = lookup("SOURCE_DOCS_DIR") {
            self.paths.source_docs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VECTOR_STORE_DIR") {
            self.paths.vector_store_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MODELS_DIR") {
            self.paths.models_dir = PathBuf::from(dir);
        }

        if let Some(name) = lookup("APP_NAME") {
            self.app_name = name;
        }
        if let Some(name) = lookup("MODEL_FILENAME") {
            self.llm.model_filename = name;
        }
        if let Some(name) = lookup("EMBEDDING_MODEL") {
            self.embedding.model_name = name;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }

        override_parsed(&lookup, "N_CTX", &mut self.llm.n_ctx)?;
        override_parsed(&lookup, "N_GPU_LAYERS", &mut self.llm.n_gpu_layers)?;
        override_parsed(&lookup, "TEMPERATURE", &mut self.llm.temperature)?;
        override_parsed(&lookup, "MAX_TOKENS", &mut self.llm.max_tokens)?;
        override_parsed(&lookup, "EMBEDDING_DIMENSION", &mut self.embedding.dimension)?;
        override_parsed(&lookup, "CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        override_parsed(&lookup, "CHUNK_OVERLAP", &mut self.chunking.chunk_overlap)?;
        override_parsed(&lookup, "RETRIEVAL_K", &mut self.search.k)?;
        override_parsed(&lookup, "DISTANCE_METRIC", &mut self.search.metric)?;
        override_parsed(&lookup, "REINGEST", &mut self.ingest.reingest)?;
        override_parsed(&lookup, "PORT", &mut self.server.port)?;

        Ok(())
    }

    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> RagResult<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(
                "chunking.chunk_overlap must be < chunk_size".into(),
            ));
        }
        if self.search.k == 0 {
            return Err(RagError::Config("search.k must be > 0".into()));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be > 0".into()));
        }
        if self.embedding.model_name.trim().is_empty() {
            return Err(RagError::Config("embedding.model_name cannot be empty".into()));
        }
        if self.llm.model_filename.trim().is_empty() {
            return Err(RagError::Config("llm.model_filename cannot be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(RagError::Config("llm.temperature must be in [0.0, 2.0]".into()));
        }
        if self.llm.n_ctx < 512 {
            return Err(RagError::Config("llm.n_ctx must be >= 512".into()));
        }
        if self.ingest.embed_batch_size == 0 {
            return Err(RagError::Config("ingest.embed_batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Full path of the GGUF weights file.
    pub fn model_path(&self) -> PathBuf {
        self.paths.models_dir.join(&self.llm.model_filename)
    }

    /// Directory holding `model.onnx` and `tokenizer.json` for the embedder.
    pub fn embedding_model_dir(&self) -> PathBuf {
        self.paths.models_dir.join(&self.embedding.model_name)
    }

    /// Create the data directories that components expect to exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.paths.source_docs_dir)?;
        std::fs::create_dir_all(&self.paths.vector_store_dir)?;
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> RagResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| RagError::Config(format!("{}={:?}: {}", name, raw, e)))?;
    }
    Ok(())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Private Legal Chat".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            paths: PathSettings::default(),
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingSettings::default(),
            search: SearchSettings::default(),
            ingest: IngestSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            source_docs_dir: data_dir.join("source_docs"),
            vector_store_dir: data_dir.join("vector_store"),
            data_dir,
            models_dir: PathBuf::from("models"),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model_filename: "mistral-7b-instruct-v0.2.Q4_K_M.gguf".to_string(),
            n_ctx: 4096,
            n_gpu_layers: -1,
            temperature: 0.2,
            max_tokens: 512,
            top_p: 0.95,
            top_k: 40,
            repetition_penalty: 1.1,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            max_length: 256,
            cache_size: 1000,
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            k: 3,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            reingest: ReingestPolicy::Accumulate,
            embed_batch_size: 32,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}
