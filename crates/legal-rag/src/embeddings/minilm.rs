use anyhow::{anyhow, Result};
use lru::LruCache;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use super::EmbeddingModel;
use crate::config::Settings;
use crate::error::{RagError, RagResult};

const MAX_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct MiniLmConfig {
    pub model_name: String,
    /// Directory with `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

impl MiniLmConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model_name: settings.embedding.model_name.clone(),
            model_dir: settings.embedding_model_dir(),
            dimension: settings.embedding.dimension,
            max_length: settings.embedding.max_length,
            cache_size: settings.embedding.cache_size,
        }
    }

    fn model_path(&self) -> PathBuf {
        self.model_dir.join("model.onnx")
    }

    fn tokenizer_path(&self) -> PathBuf {
        self.model_dir.join("tokenizer.json")
    }
}

/// Sentence-transformer embeddings (all-MiniLM-L6-v2 family) on ONNX Runtime:
/// mean pooling over the attention mask followed by L2 normalization.
pub struct MiniLmEmbeddings {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    config: MiniLmConfig,
    query_cache: Arc<Mutex<LruCache<String, Vec<f32>>>>,
}

impl MiniLmEmbeddings {
    pub fn new(config: MiniLmConfig) -> RagResult<Self> {
        let model_path = config.model_path();
        let tokenizer_path = config.tokenizer_path();
        for required in [&model_path, &tokenizer_path] {
            if !required.exists() {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "{} not found (expected an ONNX export of '{}')",
                    required.display(),
                    config.model_name
                )));
            }
        }

        let embeddings = Self::load(config, &model_path, &tokenizer_path)
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        let warmup = embeddings
            .embed_batch(&["validation test"])
            .map_err(|e| RagError::EmbeddingUnavailable(format!("warm-up inference failed: {e}")))?;
        let found = warmup.first().map(Vec::len).unwrap_or(0);
        if found != embeddings.config.dimension {
            return Err(RagError::DimensionMismatch {
                expected: embeddings.config.dimension,
                found,
            });
        }

        tracing::info!(
            model = %embeddings.config.model_name,
            dimension = found,
            "Embedding model loaded"
        );
        Ok(embeddings)
    }

    fn load(config: MiniLmConfig, model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let _ = ort::init().with_name("legal_rag_embeddings").commit();

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let model_bytes = std::fs::read(model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {:?}", e))?;
        tokenizer.with_padding(None);

        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            config,
            query_cache: Arc::new(Mutex::new(LruCache::new(cache_size))),
        })
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

            let padded_len = encodings
                .iter()
                .map(|e| e.get_ids().len())
                .max()
                .unwrap_or(0)
                .max(1);
            let batch_size = encodings.len();

            let mut ids_flat = Vec::with_capacity(batch_size * padded_len);
            let mut mask_flat = Vec::with_capacity(batch_size * padded_len);
            let mut type_flat = Vec::with_capacity(batch_size * padded_len);

            for enc in &encodings {
                let len = enc.get_ids().len();
                for i in 0..len {
                    ids_flat.push(enc.get_ids()[i] as i64);
                    mask_flat.push(enc.get_attention_mask()[i] as i64);
                    type_flat.push(enc.get_type_ids()[i] as i64);
                }
                // Pad to padded_len
                for _ in len..padded_len {
                    ids_flat.push(0i64);
                    mask_flat.push(0i64);
                    type_flat.push(0i64);
                }
            }

            let shape = vec![batch_size, padded_len];
            let input_ids = Value::from_array((shape.clone(), ids_flat))
                .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
            let attention_mask = Value::from_array((shape.clone(), mask_flat.clone()))
                .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;
            let token_type_ids = Value::from_array((shape, type_flat))
                .map_err(|e| anyhow!("token_type_ids tensor: {:?}", e))?;

            let inputs = ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ];

            let mut session = self.session.lock();
            let outputs = session
                .run(inputs)
                .map_err(|e| anyhow!("Batch inference failed: {:?}", e))?;

            let output_name = outputs
                .iter()
                .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
                .or_else(|| outputs.iter().next())
                .map(|(name, _)| name.to_string())
                .ok_or_else(|| anyhow!("Embedding model produced no outputs"))?;

            let (shape, data) = outputs[output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("Failed to extract output '{}': {:?}", output_name, e))?;

            if shape.len() != 3 {
                return Err(anyhow!(
                    "Expected [batch, seq, hidden] output, got {} dims",
                    shape.len()
                ));
            }
            let seq_len = shape[1] as usize;
            let hidden_dim = shape[2] as usize;

            for sample_idx in 0..batch_size {
                let sample = &data[sample_idx * seq_len * hidden_dim..(sample_idx + 1) * seq_len * hidden_dim];
                let mask = &mask_flat[sample_idx * padded_len..(sample_idx + 1) * padded_len];
                let pooled = mean_pool(sample, mask, seq_len, hidden_dim);
                all_embeddings.push(l2_normalize(pooled));
            }
        }

        Ok(all_embeddings)
    }
}

/// Average the token vectors whose attention mask is set.
fn mean_pool(data: &[f32], attention_mask: &[i64], seq_len: usize, hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;

    for pos in 0..seq_len {
        let mask_val = attention_mask.get(pos).copied().unwrap_or(0) as f32;
        if mask_val > 0.0 {
            mask_sum += mask_val;
            let offset = pos * hidden_dim;
            for (dim, value) in pooled.iter_mut().enumerate() {
                *value += data[offset + dim] * mask_val;
            }
        }
    }

    if mask_sum > 0.0 {
        for value in &mut pooled {
            *value /= mask_sum;
        }
    }
    pooled
}

fn l2_normalize(mut vec: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

impl EmbeddingModel for MiniLmEmbeddings {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.lock().get(text) {
            return Ok(cached.clone());
        }
        let embedding = self.embed_document(text)?;
        self.query_cache.lock().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow!("Embedding model returned no vector"))
    }

    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
