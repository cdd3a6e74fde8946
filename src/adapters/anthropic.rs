use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_analysis, normalize_chat_reply};
use super::prompt::{chat_system_prompt, ANALYSIS_PROMPT};
use super::{http, AdapterError, AdapterKind, ImageData, VisionAdapter};
use crate::analysis::{AnalysisResult, ChatMessage, ChatResponse, ChatRole};
use crate::config::AdapterConfig;

const LABEL: &str = "Claude";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

pub struct AnthropicAdapter {
    api_key: Option<String>,
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: Option<String>, config: &AdapterConfig) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            agent: http::agent(config.request_timeout()),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn image_block(image: &ImageData) -> ContentBlock {
        ContentBlock::Image {
            source: ImageSource {
                source_type: "base64",
                media_type: image.mime_type.clone(),
                data: image.base64.clone(),
            },
        }
    }

    fn send(&self, request: &MessagesRequest) -> Result<String, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::missing_key(LABEL))?;

        let url = format!("{}/messages", self.base_url);
        let req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("x-api-key", api_key)
            .set("anthropic-version", API_VERSION);

        let reply = http::send_json(LABEL, req, request)?;
        Ok(reply_text(&reply))
    }
}

/// Concatenate the text blocks of a reply.
fn reply_text(reply: &Value) -> String {
    reply
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

impl VisionAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        AdapterKind::Claude.display_name()
    }

    fn models(&self) -> Vec<String> {
        AdapterKind::Claude
            .default_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn analyze(&self, image: &ImageData, model: &str) -> Result<AnalysisResult, AdapterError> {
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: 1024,
            system: None,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Self::image_block(image),
                    ContentBlock::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                ],
            }],
        };

        let content = self.send(&request)?;
        Ok(normalize_analysis(&content))
    }

    fn supports_chat(&self) -> bool {
        true
    }

    fn chat(
        &self,
        image: &ImageData,
        metadata: &AnalysisResult,
        message: &str,
        history: &[ChatMessage],
        model: &str,
    ) -> Result<ChatResponse, AdapterError> {
        let mut messages: Vec<Message> = history
            .iter()
            .map(|turn| Message {
                role: match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: vec![ContentBlock::Text {
                    text: turn.content.clone(),
                }],
            })
            .collect();

        messages.push(Message {
            role: "user",
            content: vec![
                Self::image_block(image),
                ContentBlock::Text {
                    text: message.to_string(),
                },
            ],
        });

        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: 512,
            system: Some(chat_system_prompt(metadata)),
            messages,
        };

        let content = self.send(&request)?;
        Ok(normalize_chat_reply(&content))
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
