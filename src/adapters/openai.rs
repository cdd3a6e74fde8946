use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_analysis, normalize_chat_reply};
use super::prompt::{chat_system_prompt, ANALYSIS_PROMPT};
use super::{http, AdapterError, AdapterKind, ImageData, VisionAdapter};
use crate::analysis::{AnalysisResult, ChatMessage, ChatResponse, ChatRole};
use crate::config::AdapterConfig;

const LABEL: &str = "OpenAI";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    api_key: Option<String>,
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Content,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

impl OpenAiAdapter {
    pub fn new(api_key: Option<String>, config: &AdapterConfig) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            agent: http::agent(config.request_timeout()),
        }
    }

    /// Point at an OpenAI-compatible server instead of the hosted API.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn image_part(image: &ImageData) -> ContentPart {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
                detail: "low",
            },
        }
    }

    fn complete(&self, request: &ChatRequest) -> Result<String, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::missing_key(LABEL))?;

        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", api_key));

        let reply = http::send_json(LABEL, req, request)?;
        Ok(reply_text(&reply))
    }
}

fn reply_text(reply: &Value) -> String {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl VisionAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        AdapterKind::OpenAi.display_name()
    }

    fn models(&self) -> Vec<String> {
        AdapterKind::OpenAi
            .default_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn analyze(&self, image: &ImageData, model: &str) -> Result<AnalysisResult, AdapterError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![Message {
                role: "user",
                content: Content::Parts(vec![
                    ContentPart::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                    Self::image_part(image),
                ]),
            }],
            max_tokens: 800,
        };

        let content = self.complete(&request)?;
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
        let mut messages = vec![Message {
            role: "system",
            content: Content::Text(chat_system_prompt(metadata)),
        }];

        messages.extend(history.iter().map(|turn| Message {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: Content::Text(turn.content.clone()),
        }));

        messages.push(Message {
            role: "user",
            content: Content::Parts(vec![
                ContentPart::Text {
                    text: message.to_string(),
                },
                Self::image_part(image),
            ]),
        });

        let request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: 500,
        };

        let content = self.complete(&request)?;
        Ok(normalize_chat_reply(&content))
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::serve_once;
    use crate::adapters::normalize::FALLBACK_TAG;

    fn image() -> ImageData {
        ImageData::new("image/jpeg", "QUJD".to_string())
    }

    fn adapter(url: &str) -> OpenAiAdapter {
        OpenAiAdapter::new(Some("sk-test".to_string()), &AdapterConfig::default())
            .with_base_url(url)
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let adapter = OpenAiAdapter::new(None, &AdapterConfig::default());
        assert!(!adapter.is_configured());
        let err = adapter.analyze(&image(), "gpt-4o").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_analyze_sends_image_and_parses_reply() {
        let server = serve_once(
            200,
            r#"{"choices":[{"message":{"content":"{\"tags\":[\"cat\"],\"mood\":\"cozy\"}"}}]}"#,
        );
        let result = adapter(&server.url).analyze(&image(), "gpt-4o").unwrap();
        let request = server.request();

        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("data:image/jpeg;base64,QUJD"));
        assert!(request.contains("\"detail\":\"low\""));
        assert_eq!(result.tags, vec!["cat"]);
        assert_eq!(result.mood, "cozy");
    }

    #[test]
    fn test_prose_reply_still_yields_valid_result() {
        let server = serve_once(200, r#"{"choices":[{"message":{"content":"hello"}}]}"#);
        let result = adapter(&server.url).analyze(&image(), "gpt-4o").unwrap();
        server.request();

        assert_eq!(result.tags, vec![FALLBACK_TAG]);
        assert!(!result.colors.is_empty());
    }

    #[test]
    fn test_backend_error_passes_message_through() {
        let server = serve_once(401, r#"{"error":{"message":"Incorrect API key provided"}}"#);
        let err = adapter(&server.url).analyze(&image(), "gpt-4o").unwrap_err();
        server.request();

        match err {
            AdapterError::Backend { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_chat_sends_history_and_merges_patch() {
        let server = serve_once(
            200,
            r#"{"choices":[{"message":{"content":"{\"message\":\"Renamed.\",\"updatedMetadata\":{\"suggestedTitle\":\"Nap Time\"}}"}}]}"#,
        );
        let metadata = normalize_analysis(r#"{"tags":["cat"],"suggestedTitle":"Cat"}"#);
        let history = vec![ChatMessage::user("What is this?"), ChatMessage::assistant("A cat.")];

        let reply = adapter(&server.url)
            .chat(&image(), &metadata, "Rename it", &history, "gpt-4o")
            .unwrap();
        let request = server.request();

        assert!(request.contains("\"role\":\"system\""));
        assert!(request.contains("What is this?"));
        assert!(request.contains("\"role\":\"assistant\""));
        assert!(request.contains("Rename it"));
        assert_eq!(reply.message, "Renamed.");
        assert_eq!(
            reply.updated_metadata.unwrap().suggested_title.as_deref(),
            Some("Nap Time")
        );
    }
}
