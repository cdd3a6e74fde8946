//! Backend for a user-run Ollama server.

use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_analysis, normalize_chat_reply};
use super::prompt::{chat_system_prompt, ANALYSIS_PROMPT};
use super::{http, AdapterError, AdapterKind, ImageData, VisionAdapter};
use crate::analysis::{AnalysisResult, ChatMessage, ChatResponse, ChatRole};
use crate::config::AdapterConfig;

const LABEL: &str = "Ollama";

/// Substrings identifying vision-capable model families.
const VISION_FAMILIES: [&str; 5] = [
    "llava",
    "bakllava",
    "llava-llama3",
    "minicpm-v",
    "llama3.2-vision",
];

pub struct LocalAdapter {
    endpoint: String,
    agent: ureq::Agent,
    health_agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<&'a str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
}

impl LocalAdapter {
    pub fn new(endpoint: &str, config: &AdapterConfig) -> Self {
        Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            agent: http::agent(config.local_timeout()),
            health_agent: http::agent(config.health_timeout()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Short-deadline check of the version endpoint. Any failure counts as down.
    pub fn health_check(&self) -> bool {
        let url = format!("{}/api/version", self.endpoint);
        match self.health_agent.get(&url).call() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Ollama health check failed");
                false
            }
        }
    }

    /// Installed models that can take images.
    pub fn installed_vision_models(&self) -> Result<Vec<String>, AdapterError> {
        let url = format!("{}/api/tags", self.endpoint);
        let reply = http::get_json(LABEL, self.health_agent.get(&url))?;

        let models = reply
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .filter(|name| VISION_FAMILIES.iter().any(|family| name.contains(family)))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

impl VisionAdapter for LocalAdapter {
    fn name(&self) -> &'static str {
        AdapterKind::Ollama.display_name()
    }

    fn models(&self) -> Vec<String> {
        AdapterKind::Ollama
            .default_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn analyze(&self, image: &ImageData, model: &str) -> Result<AnalysisResult, AdapterError> {
        let request = GenerateRequest {
            model,
            prompt: ANALYSIS_PROMPT,
            images: vec![image.base64.as_str()],
            stream: false,
        };

        let url = format!("{}/api/generate", self.endpoint);
        let reply = http::send_json(LABEL, self.agent.post(&url), &request)?;
        let content = reply
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(normalize_analysis(content))
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
        let system = chat_system_prompt(metadata);

        let mut messages = vec![Message {
            role: "system",
            content: &system,
            images: Vec::new(),
        }];
        messages.extend(history.iter().map(|turn| Message {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &turn.content,
            images: Vec::new(),
        }));
        messages.push(Message {
            role: "user",
            content: message,
            images: vec![image.base64.as_str()],
        });

        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.endpoint);
        let reply = http::send_json(LABEL, self.agent.post(&url), &request)?;
        let content = reply
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(normalize_chat_reply(content))
    }

    fn is_configured(&self) -> bool {
        self.health_check()
    }
}
