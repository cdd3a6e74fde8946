use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_analysis, normalize_chat_reply};
use super::prompt::{chat_system_prompt, ANALYSIS_PROMPT};
use super::{http, AdapterError, AdapterKind, ImageData, VisionAdapter};
use crate::analysis::{AnalysisResult, ChatMessage, ChatResponse, ChatRole};
use crate::config::AdapterConfig;

const LABEL: &str = "Google";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    api_key: Option<String>,
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiAdapter {
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

    fn image_part(image: &ImageData) -> Part {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.base64.clone(),
            },
        }
    }

    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<String, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::missing_key(LABEL))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let req = self
            .agent
            .post(&url)
            .set("x-goog-api-key", api_key)
            .set("Content-Type", "application/json");

        let reply = http::send_json(LABEL, req, request)?;
        Ok(reply_text(&reply))
    }
}

/// Text parts of the first candidate, joined.
fn reply_text(reply: &Value) -> String {
    reply
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

impl VisionAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        AdapterKind::Google.display_name()
    }

    fn models(&self) -> Vec<String> {
        AdapterKind::Google
            .default_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn analyze(&self, image: &ImageData, model: &str) -> Result<AnalysisResult, AdapterError> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: None,
                parts: vec![
                    Part::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                    Self::image_part(image),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                max_output_tokens: 1024,
            },
        };

        let content = self.generate(model, &request)?;
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
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                }),
                parts: vec![Part::Text {
                    text: turn.content.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: Some("user"),
            parts: vec![
                Self::image_part(image),
                Part::Text {
                    text: message.to_string(),
                },
            ],
        });

        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::Text {
                    text: chat_system_prompt(metadata),
                }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 512,
            },
        };

        let content = self.generate(model, &request)?;
        Ok(normalize_chat_reply(&content))
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stub::{closed_url, serve_once};

    fn image() -> ImageData {
        ImageData::new("image/jpeg", "QUJD".to_string())
    }

    fn adapter(url: &str) -> GeminiAdapter {
        GeminiAdapter::new(Some("AIza-test".to_string()), &AdapterConfig::default())
            .with_base_url(url)
    }

    #[test]
    fn test_analyze_request_shape() {
        let server = serve_once(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"tags\":[\"bridge\"],"},{"text":"\"mood\":\"grand\"}"}]}}]}"#,
        );
        let result = adapter(&server.url)
            .analyze(&image(), "gemini-2.0-flash")
            .unwrap();
        let request = server.request();

        assert!(request.starts_with("POST /models/gemini-2.0-flash:generateContent HTTP"));
        assert!(request
            .to_ascii_lowercase()
            .contains("x-goog-api-key: aiza-test"));
        assert!(request.contains("\"inlineData\":{\"mimeType\":\"image/jpeg\",\"data\":\"QUJD\"}"));
        assert!(request.contains("\"maxOutputTokens\":1024"));
        assert_eq!(result.tags, vec!["bridge"]);
        assert_eq!(result.mood, "grand");
    }

    #[test]
    fn test_empty_candidates_fall_back() {
        let server = serve_once(200, r#"{"candidates":[]}"#);
        let result = adapter(&server.url)
            .analyze(&image(), "gemini-2.0-flash")
            .unwrap();
        server.request();
        assert_eq!(result.suggested_title, "Untitled");
        assert!(!result.tags.is_empty());
    }

    #[test]
    fn test_backend_error_message() {
        let server = serve_once(
            400,
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        );
        let err = adapter(&server.url)
            .analyze(&image(), "gemini-2.0-flash")
            .unwrap_err();
        server.request();
        assert_eq!(err.to_string(), "API key not valid.");
    }

    #[test]
    fn test_chat_maps_assistant_role_to_model() {
        let server = serve_once(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"Sure thing."}]}}]}"#,
        );
        let metadata = normalize_analysis("{}");
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let reply = adapter(&server.url)
            .chat(&image(), &metadata, "describe", &history, "gemini-2.0-flash")
            .unwrap();
        let request = server.request();

        assert!(request.contains("\"role\":\"model\""));
        assert!(request.contains("\"systemInstruction\""));
        assert_eq!(reply.message, "Sure thing.");
    }

    #[test]
    fn test_connection_failure_does_not_expose_key() {
        let err = GeminiAdapter::new(Some("AIzaSECRET123".to_string()), &AdapterConfig::default())
            .with_base_url(&closed_url())
            .analyze(&image(), "gemini-2.0-flash")
            .unwrap_err();

        assert!(matches!(err, AdapterError::Transport { .. }));
        assert!(!err.to_string().contains("AIzaSECRET123"));
        assert!(!format!("{:?}", err).contains("AIzaSECRET123"));
    }
}
