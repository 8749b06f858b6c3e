//! Conversation types and chat prompt rendering for the Omost LLMs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Instruction prepended to every request: it is what makes the model
/// answer with a `Canvas` program instead of prose.
pub const SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant to compose images using the below python class `Canvas`:

```python
class Canvas:
    def set_global_description(self, description: str, detailed_descriptions: list[str], tags: str, HTML_web_color_name: str):
        pass

    def add_local_description(self, location: str, offset: str, area: str, distance_to_viewer: float, description: str, detailed_descriptions: list[str], tags: str, atmosphere: str, style: str, quality_meta: str, HTML_web_color_name: str):
        assert location in ["in the center", "on the left", "on the right", "on the top", "on the bottom", "on the top-left", "on the top-right", "on the bottom-left", "on the bottom-right"]
        assert offset in ["no offset", "slightly to the left", "slightly to the right", "slightly to the upper", "slightly to the lower", "slightly to the upper-left", "slightly to the upper-right", "slightly to the lower-left", "slightly to the lower-right"]
        assert area in ["a small square area", "a small vertical area", "a small horizontal area", "a medium-sized square area", "a medium-sized vertical area", "a medium-sized horizontal area", "a large square area", "a large vertical area", "a large horizontal area"]
        pass
```"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message history, serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation(Vec<Message>);

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages handed to the model for one turn: the system prompt, the
    /// prior history, then the new user text.
    pub fn request_messages(&self, text: &str) -> Conversation {
        let mut messages = Vec::with_capacity(self.0.len() + 2);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend(self.0.iter().cloned());
        messages.push(Message::user(text));
        Conversation(messages)
    }

    /// History to hand back to the caller after a turn: prior history plus
    /// the new user/assistant exchange, system prompt excluded.
    pub fn extended_with(&self, text: &str, reply: &str) -> Conversation {
        let mut messages = self.0.clone();
        messages.push(Message::user(text));
        messages.push(Message::assistant(reply));
        Conversation(messages)
    }
}

/// Chat wire format of the model family. The `tokenizers` crate has no
/// `apply_chat_template`, so the formats are spelled out here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Llama 3 instruct header format.
    Llama3,
    /// ChatML, used by the dolphin finetunes.
    ChatMl,
}

impl PromptTemplate {
    /// Render a conversation to the model's input string, with the
    /// assistant generation prompt appended.
    pub fn render(&self, conversation: &Conversation) -> String {
        let mut out = String::new();
        match self {
            PromptTemplate::Llama3 => {
                out.push_str("<|begin_of_text|>");
                for message in conversation.messages() {
                    out.push_str(&format!(
                        "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
                        message.role, message.content
                    ));
                }
                out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
            }
            PromptTemplate::ChatMl => {
                for message in conversation.messages() {
                    out.push_str(&format!(
                        "<|im_start|>{}\n{}<|im_end|>\n",
                        message.role, message.content
                    ));
                }
                out.push_str("<|im_start|>assistant\n");
            }
        }
        out
    }

    /// The template's end-of-turn marker, used as a generation stop token.
    pub fn stop_token(&self) -> &'static str {
        match self {
            PromptTemplate::Llama3 => "<|eot_id|>",
            PromptTemplate::ChatMl => "<|im_end|>",
        }
    }
}
