pub mod canvas;
pub mod chat;
mod conditioning;
mod device;
mod encoder;
pub mod llm;
mod loader;
mod params;
mod render;

pub use canvas::{compute_masks, Canvas, CanvasError, CanvasRegion, Rect, RegionMask, CANVAS_SIZE};
pub use chat::{Conversation, Message, PromptTemplate, Role, SYSTEM_PROMPT};
pub use conditioning::{layout_cond, RegionConditioning};
pub use device::{select_best_device, DeviceMap};
pub use encoder::{encode_bag_of_subprompts, ClipTextEncoder, EncodedPrompt, TextEncoder};
pub use loader::Loader;
pub use params::{ChatParams, LayoutParams, ParamsError};
pub use render::render_canvas;

use serde::{Deserialize, Serialize};

/// One chat turn against the layout model.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub text: String,
    pub conversation: Option<Conversation>,
    pub max_new_tokens: Option<usize>,
    pub top_p: Option<f64>,
    pub temperature: Option<f64>,
    pub seed: Option<u64>,
}

impl ChatRequest {
    /// Fold the optional knobs over the schema defaults.
    pub fn params(&self) -> ChatParams {
        let defaults = ChatParams::default();
        ChatParams {
            max_new_tokens: self.max_new_tokens.unwrap_or(defaults.max_new_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            seed: self.seed,
        }
    }
}

/// Result of one chat turn: the extended history and the raw reply.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub conversation: Conversation,
    pub reply: String,
}

/// A loaded layout language model. Generation mutates the KV cache, so
/// callers serialize access (the server keeps the model behind a mutex).
pub trait LlmLike: Send {
    fn chat(
        &mut self,
        history: &Conversation,
        text: &str,
        params: &ChatParams,
    ) -> anyhow::Result<ChatOutcome>;
}

impl std::fmt::Debug for dyn LlmLike {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn LlmLike")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_fills_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"text": "a cat on a sofa"}"#).unwrap();
        let params = request.params();
        assert_eq!(params.max_new_tokens, 4096);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.temperature, 0.6);
        assert_eq!(params.seed, None);
    }

    #[test]
    fn chat_request_overrides_stick() {
        let request = ChatRequest {
            text: "a cat".to_string(),
            conversation: None,
            max_new_tokens: Some(512),
            top_p: None,
            temperature: Some(0.0),
            seed: Some(42),
        };
        let params = request.params();
        assert_eq!(params.max_new_tokens, 512);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.seed, Some(42));
    }
}
