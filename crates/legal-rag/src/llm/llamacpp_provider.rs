//! llama.cpp LLM provider: native local inference via llama-cpp-2 bindings.
//!
//! Loads a GGUF model once and creates a fresh context per request.
//! Streaming is handled via `spawn_blocking` + mpsc channels since
//! llama.cpp is synchronous and CPU-bound.

use anyhow::{anyhow, Context as AnyhowContext, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use super::streaming::TokenStream;
use super::{GenerationConfig, LLMProvider, ProviderInfo};
use crate::config::LlmSettings;
use crate::error::{RagError, RagResult};

/// llama.cpp refuses a second backend init in the same process.
static BACKEND: Mutex<Option<Arc<LlamaBackend>>> = Mutex::new(None);

fn shared_backend() -> Result<Arc<LlamaBackend>> {
    let mut slot = BACKEND.lock();
    if let Some(backend) = slot.as_ref() {
        return Ok(Arc::clone(backend));
    }
    let backend = Arc::new(LlamaBackend::init().context("Failed to initialize llama.cpp backend")?);
    *slot = Some(Arc::clone(&backend));
    Ok(backend)
}

/// Markers after which a completion has started a new turn on its own.
const BUILTIN_STOPS: &[&str] = &["\nQuestion:", "</s>", "[INST]", "<|im_end|>", "<|endoftext|>"];

const PROMPT_BATCH: usize = 2048;

pub struct LlamaCppProvider {
    model: Arc<LlamaModel>,
    backend: Arc<LlamaBackend>,
    model_name: String,
    n_ctx: u32,
}

// SAFETY: LlamaModel and LlamaBackend are thread-safe for read-only operations.
// Mutable state (LlamaContext) is created per-inference call and not shared.
unsafe impl Send for LlamaCppProvider {}
unsafe impl Sync for LlamaCppProvider {}

impl LlamaCppProvider {
    /// Load the GGUF weights at `model_path`. A missing file is reported as
    /// `ModelNotFound` before the backend is touched.
    pub fn load(model_path: &Path, settings: &LlmSettings) -> RagResult<Self> {
        if !model_path.is_file() {
            return Err(RagError::ModelNotFound(model_path.to_path_buf()));
        }

        let backend = shared_backend().map_err(|source| RagError::Load {
            path: model_path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            path = %model_path.display(),
            n_ctx = settings.n_ctx,
            n_gpu_layers = settings.n_gpu_layers,
            "Loading GGUF model via llama.cpp"
        );

        let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers(settings.n_gpu_layers));
        let model = LlamaModel::load_from_file(&backend, model_path, &model_params).map_err(|e| {
            RagError::Load {
                path: model_path.to_path_buf(),
                source: anyhow!("Failed to load GGUF model: {:?}", e),
            }
        })?;

        let model_name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| settings.model_filename.clone());

        tracing::info!(model = %model_name, "llama.cpp model loaded successfully");

        Ok(Self {
            model: Arc::new(model),
            backend,
            model_name,
            n_ctx: settings.n_ctx,
        })
    }

    /// Run synchronous inference. Called from both `generate()` and `generate_stream()`.
    /// If `token_sender` is Some, tokens are streamed as they're generated.
    fn run_inference(
        model: &LlamaModel,
        backend: &LlamaBackend,
        n_ctx: u32,
        prompt: &str,
        config: &GenerationConfig,
        token_sender: Option<&mpsc::Sender<Result<String>>>,
    ) -> Result<String> {
        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(n_ctx));
        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| anyhow!("Failed to create llama context: {:?}", e))?;

        let tokens = model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;
        if tokens.is_empty() {
            return Ok(String::new());
        }

        // Keep the tail of the prompt (the question) when it cannot fit next
        // to the completion budget.
        let max_tokens = config.max_tokens.min(n_ctx as usize / 2);
        let max_prompt_tokens = (n_ctx as usize).saturating_sub(max_tokens);
        let n_prompt_raw = tokens.len();
        let tokens = if n_prompt_raw > max_prompt_tokens {
            tracing::warn!(
                n_prompt = n_prompt_raw,
                max = max_prompt_tokens,
                "Prompt truncated to fit context window"
            );
            tokens[n_prompt_raw - max_prompt_tokens..].to_vec()
        } else {
            tokens
        };
        let n_prompt = tokens.len();

        let mut batch = LlamaBatch::new(PROMPT_BATCH, 1);
        let mut processed = 0usize;
        while processed < n_prompt {
            batch.clear();
            let chunk_end = (processed + PROMPT_BATCH).min(n_prompt);
            for (i, token) in tokens.iter().enumerate().take(chunk_end).skip(processed) {
                batch
                    .add(*token, i as i32, &[0], i == n_prompt - 1)
                    .map_err(|_| anyhow!("Failed to add token to batch"))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| anyhow!("Prompt decode chunk {}-{} failed: {:?}", processed, chunk_end, e))?;
            processed = chunk_end;
        }

        let mut sampler = build_sampler(config);

        let mut completion = Completion::new(&config.stop_sequences);
        let mut n_decoded = 0usize;
        let mut cur_pos = n_prompt as i32;
        let eos_token = model.token_eos();
        let mut stream_open = token_sender.is_some();
        let mut stopped = false;

        while n_decoded < max_tokens {
            let new_token = sampler.sample(&ctx, -1);
            if new_token == eos_token {
                break;
            }

            #[allow(deprecated)]
            let bytes = model
                .token_to_bytes(new_token, Special::Tokenize)
                .map_err(|e| anyhow!("Failed to detokenize {:?}: {:?}", new_token, e))?;

            let (ready, hit_stop) = completion.push(&bytes);
            if let Some(sender) = token_sender.filter(|_| stream_open && !ready.is_empty()) {
                if sender.blocking_send(Ok(ready)).is_err() {
                    // Receiver dropped, stop generation
                    stream_open = false;
                    break;
                }
            }
            if hit_stop {
                stopped = true;
                break;
            }

            if n_decoded > 100 && n_decoded % 50 == 0 && has_repetition(completion.text()) {
                tracing::warn!(tokens = n_decoded, "Repetition detected, stopping generation");
                break;
            }

            n_decoded += 1;

            batch.clear();
            batch
                .add(new_token, cur_pos, &[0], true)
                .map_err(|_| anyhow!("Failed to add generated token to batch"))?;
            cur_pos += 1;

            ctx.decode(&mut batch)
                .map_err(|e| anyhow!("Decode step {} failed: {:?}", n_decoded, e))?;
        }

        if !stopped {
            let tail = completion.flush();
            if let Some(sender) = token_sender.filter(|_| stream_open && !tail.is_empty()) {
                let _ = sender.blocking_send(Ok(tail));
            }
        }

        tracing::debug!(
            prompt_tokens = n_prompt,
            generated_tokens = n_decoded,
            "llama.cpp inference complete"
        );

        Ok(completion.text().trim().to_string())
    }
}

fn gpu_layers(n_gpu_layers: i32) -> u32 {
    if n_gpu_layers < 0 {
        u32::MAX
    } else {
        n_gpu_layers as u32
    }
}

fn build_sampler(config: &GenerationConfig) -> LlamaSampler {
    // penalties(last_n, repeat_penalty, freq_penalty, presence_penalty)
    let penalties = LlamaSampler::penalties(256, config.repetition_penalty, 0.0, 0.0);
    if config.temperature <= 0.0 {
        return LlamaSampler::chain_simple([penalties, LlamaSampler::greedy()]);
    }
    LlamaSampler::chain_simple([
        penalties,
        LlamaSampler::top_k(config.top_k as i32),
        LlamaSampler::top_p(config.top_p, 1),
        LlamaSampler::temp(config.temperature),
        LlamaSampler::dist(config.seed.unwrap_or(0) as u32),
    ])
}

/// Completion text built from raw token bytes.
///
/// Bytes that do not yet form a whole UTF-8 character stay undecoded, and a
/// tail that could still grow into a stop marker is held back, so streamed
/// fragments concatenate to exactly the text `generate` returns.
struct Completion {
    stops: Vec<String>,
    text: String,
    undecoded: Vec<u8>,
    released: usize,
}

impl Completion {
    fn new(user_stops: &[String]) -> Self {
        let stops = user_stops
            .iter()
            .filter(|stop| !stop.is_empty())
            .cloned()
            .chain(BUILTIN_STOPS.iter().map(|stop| stop.to_string()))
            .collect();
        Self {
            stops,
            text: String::new(),
            undecoded: Vec::new(),
            released: 0,
        }
    }

    fn text(&self) -> &str {
        &self.text
    }

    /// Add one token's bytes. Returns the text that is now safe to release
    /// and whether a stop marker ended the completion.
    fn push(&mut self, bytes: &[u8]) -> (String, bool) {
        self.undecoded.extend_from_slice(bytes);
        self.decode();

        if let Some(cut) = self.stop_position() {
            self.text.truncate(cut);
            return (self.release(cut), true);
        }
        let hold_from = self.held_back_from();
        (self.release(hold_from), false)
    }

    /// Release everything still held once generation ends without a stop.
    fn flush(&mut self) -> String {
        if !self.undecoded.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.undecoded));
            self.undecoded.clear();
        }
        self.release(self.text.len())
    }

    fn decode(&mut self) {
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.undecoded.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.undecoded[..valid_up_to]));
                    match e.error_len() {
                        Some(invalid) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid_up_to + invalid);
                        }
                        // incomplete character, wait for the next token
                        None => {
                            self.undecoded.drain(..valid_up_to);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Byte offset of the earliest stop marker in the unreleased text.
    fn stop_position(&self) -> Option<usize> {
        let pending = &self.text[self.released..];
        self.stops
            .iter()
            .filter_map(|stop| pending.find(stop.as_str()))
            .min()
            .map(|at| self.released + at)
    }

    /// Start of the longest unreleased suffix that begins some stop marker.
    fn held_back_from(&self) -> usize {
        let pending = &self.text[self.released..];
        pending
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| self.stops.iter().any(|stop| stop.starts_with(&pending[i..])))
            .map_or(self.text.len(), |i| self.released + i)
    }

    fn release(&mut self, up_to: usize) -> String {
        let ready = self.text[self.released..up_to].to_string();
        self.released = up_to;
        ready
    }
}

/// Detect if the tail of `text` repeats a block three or more times. Used to
/// break generation loops.
fn has_repetition(text: &str) -> bool {
    let bytes = text.as_bytes();
    let tail = &bytes[bytes.len().saturating_sub(300)..];
    let len = tail.len();
    if len < 100 {
        return false;
    }

    for block_size in [30, 50, 80] {
        if len < block_size * 3 {
            continue;
        }
        let last_block = &tail[len - block_size..];
        let count = tail[..len - block_size]
            .windows(block_size)
            .filter(|w| *w == last_block)
            .count();
        if count >= 2 {
            return true;
        }
    }

    false
}

#[async_trait]
impl LLMProvider for LlamaCppProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let model = Arc::clone(&self.model);
        let backend = Arc::clone(&self.backend);
        let n_ctx = self.n_ctx;
        let prompt = prompt.to_string();
        let config = config.clone();

        tokio::task::spawn_blocking(move || {
            Self::run_inference(&model, &backend, n_ctx, &prompt, &config, None)
        })
        .await
        .map_err(|e| anyhow!("Inference task panicked: {}", e))?
    }

    async fn generate_stream(&self, prompt: &str, config: &GenerationConfig) -> Result<TokenStream> {
        let model = Arc::clone(&self.model);
        let backend = Arc::clone(&self.backend);
        let n_ctx = self.n_ctx;
        let prompt = prompt.to_string();
        let config = config.clone();

        let (tx, rx) = mpsc::channel(256);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = Self::run_inference(&model, &backend, n_ctx, &prompt, &config, Some(&tx)) {
                tracing::error!("Streaming inference failed: {}", e);
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(TokenStream::new(rx))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "llama.cpp".to_string(),
            model: self.model_name.clone(),
            context_window: self.n_ctx as usize,
            supports_streaming: true,
            is_local: true,
        }
    }
}
