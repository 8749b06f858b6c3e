//! Loading and driving the Omost layout language models.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use hf_hub::api::tokio::{Api, ApiRepo};
use tokenizers::Tokenizer;

use crate::chat::{Conversation, PromptTemplate};
use crate::{select_best_device, ChatOutcome, ChatParams, DeviceMap, LlmLike, Loader};

/// Seed used when a request does not pin one.
const DEFAULT_SEED: u64 = 299792458;

/// The published Omost checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmVariant {
    Llama3,
    Dolphin,
    Phi3,
}

impl LlmVariant {
    /// Detect the variant from a model name or repo id.
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("DOLPHIN") {
            Some(LlmVariant::Dolphin)
        } else if name_upper.contains("PHI") {
            Some(LlmVariant::Phi3)
        } else if name_upper.contains("LLAMA") {
            Some(LlmVariant::Llama3)
        } else {
            None
        }
    }

    pub fn repo_id(&self) -> &'static str {
        match self {
            LlmVariant::Llama3 => "lllyasviel/omost-llama-3-8b",
            LlmVariant::Dolphin => "lllyasviel/omost-dolphin-2.9-llama3-8b",
            LlmVariant::Phi3 => "lllyasviel/omost-phi-3-mini-128k",
        }
    }

    /// Chat template of the variant, for the families this crate can run.
    pub fn template(&self) -> Option<PromptTemplate> {
        match self {
            LlmVariant::Llama3 => Some(PromptTemplate::Llama3),
            LlmVariant::Dolphin => Some(PromptTemplate::ChatMl),
            LlmVariant::Phi3 => None,
        }
    }
}

/// Load a model by name, detecting the variant automatically.
pub async fn load_llm(
    model_name: &str,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<Mutex<dyn LlmLike>>> {
    let variant = LlmVariant::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model: {}", model_name))?;

    log::info!("loading model {model_name} (detected variant: {variant:?})");

    match variant {
        LlmVariant::Llama3 | LlmVariant::Dolphin => {
            let model = LlamaLoader::load(variant, api, device_map).await?;
            Ok(Arc::new(Mutex::new(model)))
        }
        LlmVariant::Phi3 => Err(anyhow!(
            "model variant {:?} is recognized but not yet implemented",
            variant
        )),
    }
}

/// Resolve the safetensors shards listed in the repo's index file, falling
/// back to the single-file layout for unsharded checkpoints.
async fn hub_load_safetensors(repo: &ApiRepo) -> Result<Vec<std::path::PathBuf>> {
    let index_file = match repo.get("model.safetensors.index.json").await {
        Ok(file) => file,
        Err(_) => {
            let single = repo
                .get("model.safetensors")
                .await
                .context("failed to get model weights")?;
            return Ok(vec![single]);
        }
    };
    let index: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(index_file).context("failed to read safetensors index")?,
    )
    .context("failed to parse safetensors index")?;
    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .context("safetensors index has no weight_map")?;

    let mut names: Vec<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    names.sort_unstable();
    names.dedup();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        files.push(
            repo.get(name)
                .await
                .with_context(|| format!("failed to get weight shard {name}"))?,
        );
    }
    Ok(files)
}

pub struct OmostLlama {
    model: Llama,
    tokenizer: Tokenizer,
    config: Config,
    device: Device,
    dtype: DType,
    template: PromptTemplate,
    stop_tokens: HashSet<u32>,
}

impl LlmLike for OmostLlama {
    fn chat(
        &mut self,
        history: &Conversation,
        text: &str,
        params: &ChatParams,
    ) -> Result<ChatOutcome> {
        params.validate()?;

        let prompt = self.template.render(&history.request_messages(text));
        let mut tokens = self
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        log::debug!("chat prompt is {} tokens", tokens.len());

        // Fresh KV cache per request; there is no cross-request state.
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let temperature = (params.temperature > 0.0).then_some(params.temperature);
        let mut logits_processor = LogitsProcessor::new(
            params.seed.unwrap_or(DEFAULT_SEED),
            temperature,
            Some(params.top_p),
        );

        let mut generated: Vec<u32> = Vec::new();
        let mut index_pos = 0;
        for index in 0..params.max_new_tokens {
            let (context_size, context_index) = if index > 0 {
                (1, index_pos)
            } else {
                (tokens.len(), 0)
            };
            let context = &tokens[tokens.len() - context_size..];
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, context_index, &mut cache)?;
            let logits = logits.squeeze(0)?;
            index_pos += context.len();

            let next_token = logits_processor.sample(&logits)?;
            if self.stop_tokens.contains(&next_token) {
                break;
            }
            tokens.push(next_token);
            generated.push(next_token);
        }

        let reply = self
            .tokenizer
            .decode(&generated, true)
            .map_err(Error::msg)?;
        log::debug!("generated {} tokens", generated.len());

        Ok(ChatOutcome {
            conversation: history.extended_with(text, &reply),
            reply,
        })
    }
}

pub struct LlamaLoader;

impl Loader for LlamaLoader {
    type Model = OmostLlama;

    async fn load(variant: LlmVariant, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        let template = variant
            .template()
            .ok_or_else(|| anyhow!("variant {:?} has no llama chat template", variant))?;

        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();

        let repo = api.repo(hf_hub::Repo::model(variant.repo_id().to_string()));

        let config_file = repo
            .get("config.json")
            .await
            .context("failed to get llama config")?;
        let config_str =
            std::fs::read_to_string(&config_file).context("failed to read llama config")?;
        let llama_config: LlamaConfig =
            serde_json::from_str(&config_str).context("failed to parse llama config")?;
        let config = llama_config.into_config(false);

        let tokenizer_file = repo
            .get("tokenizer.json")
            .await
            .context("failed to get tokenizer")?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load tokenizer")?;

        let weight_files = hub_load_safetensors(&repo).await?;
        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&weight_files, dtype, &device)
                .context("failed to build llama var builder")?
        };
        let model = Llama::load(vb, &config).context("failed to load llama weights")?;

        let mut stop_tokens = HashSet::new();
        match &config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => {
                stop_tokens.insert(*id);
            }
            Some(LlamaEosToks::Multiple(ids)) => {
                stop_tokens.extend(ids.iter().copied());
            }
            None => {}
        }
        if let Some(id) = tokenizer.token_to_id(template.stop_token()) {
            stop_tokens.insert(id);
        }

        Ok(OmostLlama {
            model,
            tokenizer,
            config,
            device,
            dtype,
            template,
            stop_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_detection_from_repo_names() {
        assert_eq!(
            LlmVariant::from_name("lllyasviel/omost-llama-3-8b-4bits"),
            Some(LlmVariant::Llama3)
        );
        assert_eq!(
            LlmVariant::from_name("lllyasviel/omost-dolphin-2.9-llama3-8b"),
            Some(LlmVariant::Dolphin)
        );
        assert_eq!(
            LlmVariant::from_name("lllyasviel/omost-phi-3-mini-128k-8bits"),
            Some(LlmVariant::Phi3)
        );
        assert_eq!(LlmVariant::from_name("some-other-model"), None);
    }

    #[test]
    fn dolphin_detection_beats_llama_substring() {
        // The dolphin repo id also contains "llama3".
        let variant = LlmVariant::from_name("omost-dolphin-2.9-llama3-8b").unwrap();
        assert_eq!(variant.template(), Some(PromptTemplate::ChatMl));
    }

    #[test]
    fn phi3_has_no_llama_template() {
        assert_eq!(LlmVariant::Phi3.template(), None);
    }

    #[tokio::test]
    async fn unsupported_model_name_is_rejected() {
        let api = Api::new().unwrap();
        let err = load_llm("mistral-7b", api, DeviceMap::ForceCpu)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported model"));
    }
}
