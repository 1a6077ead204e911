//! Local GGUF inference through llama.cpp.

use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use super::{ClientError, GenerationConfig, ModelClient, Role, Turn};
use crate::sanitize::strip_reasoning;

const JSON_ONLY: &str = "Reply with a single valid JSON object and nothing else.";

pub struct LocalModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Maximum tokens to generate per reply.
    pub max_tokens: usize,
    pub seed: u32,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8192,
            max_tokens: 1024,
            seed: 1234,
        }
    }
}

pub struct LocalModel {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    label: String,
    n_ctx: u32,
    max_tokens: usize,
    seed: u32,
}

impl LocalModel {
    pub fn load(model_path: &str, config: LocalModelConfig) -> Result<Self> {
        anyhow::ensure!(config.n_ctx > 0, "context size must be positive");

        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(config.n_ctx));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        Ok(Self {
            backend,
            model,
            ctx,
            label: model_path.to_string(),
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
            seed: config.seed,
        })
    }

    fn sampler(&self, temperature: f32) -> LlamaSampler {
        LlamaSampler::chain_simple([
            LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
            LlamaSampler::top_k(40),
            LlamaSampler::top_p(0.95, 1),
            LlamaSampler::min_p(0.0, 1),
            LlamaSampler::temp(temperature),
            LlamaSampler::dist(self.seed),
        ])
    }

    /// Chat templates speak "assistant", not "model"; JSON mode becomes a
    /// system instruction since llama.cpp has no response MIME type.
    fn chat_messages(turns: &[Turn]) -> Result<Vec<LlamaChatMessage>> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(LlamaChatMessage::new("system".into(), JSON_ONLY.into())?);
        for turn in turns {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            messages.push(LlamaChatMessage::new(role.into(), turn.content.clone())?);
        }
        Ok(messages)
    }

    fn generate(&mut self, turns: &[Turn], config: &GenerationConfig) -> Result<String> {
        self.ctx.clear_kv_cache();

        let messages = Self::chat_messages(turns)
            .context("failed to create chat messages")?;
        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &messages, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;
        anyhow::ensure!(
            !tokens.is_empty() && tokens.len() < self.n_ctx as usize,
            "prompt of {} tokens does not fit a {} token context",
            tokens.len(),
            self.n_ctx
        );
        info!("Prompt tokenized: {} tokens", tokens.len());

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx.decode(&mut batch).context("initial decode failed")?;

        let mut sampler = self.sampler(config.temperature);
        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..self.max_tokens {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        Ok(output)
    }
}

impl ModelClient for LocalModel {
    fn generate_structured(
        &mut self,
        turns: &[Turn],
        config: &GenerationConfig,
    ) -> Result<String, ClientError> {
        info!("=== LOCAL CALL: {} turns ===", turns.len());
        let raw = self
            .generate(turns, config)
            .map_err(|e| ClientError::Transport(format!("{e:#}")))?;
        info!("Local model produced {} chars", raw.len());
        Ok(strip_reasoning(&raw))
    }

    fn name(&self) -> &str {
        &self.label
    }
}
