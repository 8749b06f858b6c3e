//! Text encoding for region prompts.
//!
//! The conditioning pipeline only needs an embedding plus a pooled summary
//! vector per prompt, so the encoder sits behind a small trait; the shipped
//! implementation is the CLIP-L text tower.

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::clip::text_model::{self, ClipTextTransformer};
use hf_hub::api::tokio::Api;
use tokenizers::Tokenizer;

use crate::canvas::CanvasError;
use crate::{select_best_device, DeviceMap};

const CLIP_REPO: &str = "openai/clip-vit-large-patch14";
const CLIP_MAX_POSITIONS: usize = 77;

/// Encoded form of one complete prompt.
#[derive(Debug, Clone)]
pub struct EncodedPrompt {
    /// Per-token embedding, shape `(1, seq, dim)`.
    pub cond: Tensor,
    /// Pooled summary vector, shape `(dim,)`.
    pub pooled: Tensor,
}

pub trait TextEncoder {
    fn encode(&self, text: &str) -> Result<EncodedPrompt>;
}

pub struct ClipTextEncoder {
    model: ClipTextTransformer,
    tokenizer: Tokenizer,
    device: Device,
}

impl ClipTextEncoder {
    pub async fn load(api: &Api, device_map: DeviceMap) -> Result<Self> {
        let device = select_best_device(device_map).context("failed to set up device")?;

        let clip_repo = api.repo(hf_hub::Repo::model(CLIP_REPO.to_string()));
        let clip_model_file = clip_repo
            .get("model.safetensors")
            .await
            .context("failed to get CLIP model file")?;
        let clip_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[clip_model_file], DType::F32, &device)
                .context("failed to build CLIP var builder")?
        };
        let clip_config = text_model::ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: text_model::Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: CLIP_MAX_POSITIONS,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load CLIP model")?;
        let clip_tokenizer_filename = clip_repo
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let tokenizer = Tokenizer::from_file(clip_tokenizer_filename)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        log::info!("loaded CLIP text encoder from {CLIP_REPO}");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }
}

impl TextEncoder for ClipTextEncoder {
    fn encode(&self, text: &str) -> Result<EncodedPrompt> {
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(CLIP_MAX_POSITIONS);

        let input = Tensor::new(&*tokens, &self.device)?.unsqueeze(0)?;
        let cond = self.model.forward(&input)?;
        // The end-of-text token sits last after truncation; its hidden
        // state is CLIP's pooled representation.
        let pooled = cond.i((0, tokens.len() - 1))?;
        Ok(EncodedPrompt { cond, pooled })
    }
}

/// Encode a region's "bag of subprompts".
///
/// Each suffix is encoded independently as `prefixes..suffix`, the token
/// embeddings are concatenated along the sequence axis, and the pooled
/// vector of the first suffix stands in for the whole region. This is a
/// deliberate simplification of Omost's greedy prompt merger; keep it, do
/// not "fix" it.
pub fn encode_bag_of_subprompts(
    encoder: &dyn TextEncoder,
    prefixes: &[String],
    suffixes: &[String],
) -> Result<EncodedPrompt> {
    let (first, rest) = suffixes
        .split_first()
        .ok_or(CanvasError::EmptyPrompt)?;

    log::debug!("start encoding bag of subprompts");
    let lead = prefixes.concat();

    let head = encoder.encode(&format!("{lead}{first}"))?;
    let pooled = head.pooled;
    let mut conds = vec![head.cond];
    for suffix in rest {
        let complete_prompt = format!("{lead}{suffix}");
        log::debug!("encoding prompt: {complete_prompt}");
        conds.push(encoder.encode(&complete_prompt)?.cond);
    }
    log::debug!("end encoding bag of subprompts, total conditions: {}", conds.len());

    let cond = Tensor::cat(&conds, 1)?;
    Ok(EncodedPrompt { cond, pooled })
}
