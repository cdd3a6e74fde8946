//! Vision backends behind one contract.
//!
//! Each backend turns an image into an [`AnalysisResult`]; the network
//! backends can also hold a conversation about an image. Backends are chosen
//! through [`AdapterRegistry`] by [`AdapterKind`], never by matching on names
//! at call sites.

mod anthropic;
mod error;
mod gemini;
mod http;
mod image_data;
mod local;
mod mock;
pub mod normalize;
mod openai;
pub mod prompt;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::analysis::{AnalysisResult, ChatMessage, ChatResponse};
use crate::config::AdapterConfig;
use crate::store::{Store, StoreResult};

pub use anthropic::AnthropicAdapter;
pub use error::AdapterError;
pub use gemini::GeminiAdapter;
pub use image_data::ImageData;
pub(crate) use image_data::encode_jpeg;
#[cfg(test)]
pub(crate) use image_data::sample_png;
pub use local::LocalAdapter;
pub use mock::MockAdapter;
pub use openai::OpenAiAdapter;

#[cfg(test)]
pub(crate) use http::stub;

/// Trait for backends that can describe images
pub trait VisionAdapter: Send + Sync {
    /// Display name
    fn name(&self) -> &'static str;

    /// Models this backend offers
    fn models(&self) -> Vec<String>;

    /// Analyze an image. Malformed backend output never fails this call.
    fn analyze(&self, image: &ImageData, model: &str) -> Result<AnalysisResult, AdapterError>;

    fn supports_chat(&self) -> bool {
        false
    }

    /// One chat turn about an image. `history` holds the earlier turns, not `message`.
    fn chat(
        &self,
        _image: &ImageData,
        _metadata: &AnalysisResult,
        _message: &str,
        _history: &[ChatMessage],
        _model: &str,
    ) -> Result<ChatResponse, AdapterError> {
        Err(AdapterError::ChatUnsupported(self.name()))
    }

    /// Whether a request could be sent right now. May touch the network.
    fn is_configured(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdapterKind {
    Mock,
    OpenAi,
    Claude,
    Google,
    Ollama,
}

/// Credential hints shown when asking the user for a key or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub env_var: &'static str,
    pub placeholder: &'static str,
    pub help_url: &'static str,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 5] = [
        AdapterKind::Mock,
        AdapterKind::OpenAi,
        AdapterKind::Claude,
        AdapterKind::Google,
        AdapterKind::Ollama,
    ];

    /// Stable identifier, used as the settings and credential key.
    pub fn key(&self) -> &'static str {
        match self {
            AdapterKind::Mock => "mock",
            AdapterKind::OpenAi => "openai",
            AdapterKind::Claude => "claude",
            AdapterKind::Google => "google",
            AdapterKind::Ollama => "ollama",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AdapterKind::Mock => "Mock (Demo)",
            AdapterKind::OpenAi => "OpenAI Vision",
            AdapterKind::Claude => "Claude Vision",
            AdapterKind::Google => "Google Vision",
            AdapterKind::Ollama => "Ollama (Local)",
        }
    }

    pub fn default_models(&self) -> &'static [&'static str] {
        match self {
            AdapterKind::Mock => &["demo-v1"],
            AdapterKind::OpenAi => &["gpt-4o", "gpt-4o-mini"],
            AdapterKind::Claude => &[
                "claude-sonnet-4-20250514",
                "claude-3-5-sonnet-latest",
                "claude-3-haiku-20240307",
            ],
            AdapterKind::Google => &["gemini-2.0-flash", "gemini-1.5-pro", "gemini-1.5-flash"],
            AdapterKind::Ollama => &[
                "llava:latest",
                "llama3.2-vision:latest",
                "minicpm-v:latest",
            ],
        }
    }

    pub fn requires_key(&self) -> bool {
        matches!(
            self,
            AdapterKind::OpenAi | AdapterKind::Claude | AdapterKind::Google
        )
    }

    pub fn key_info(&self) -> Option<KeyInfo> {
        match self {
            AdapterKind::Mock => None,
            AdapterKind::OpenAi => Some(KeyInfo {
                env_var: "OPENAI_API_KEY",
                placeholder: "sk-...",
                help_url: "https://platform.openai.com/api-keys",
            }),
            AdapterKind::Claude => Some(KeyInfo {
                env_var: "ANTHROPIC_API_KEY",
                placeholder: "sk-ant-...",
                help_url: "https://console.anthropic.com/settings/keys",
            }),
            AdapterKind::Google => Some(KeyInfo {
                env_var: "GOOGLE_API_KEY",
                placeholder: "AIza...",
                help_url: "https://aistudio.google.com/apikey",
            }),
            AdapterKind::Ollama => Some(KeyInfo {
                env_var: "OLLAMA_URL",
                placeholder: "http://localhost:11434",
                help_url: "https://ollama.ai",
            }),
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAdapter(pub String);

impl fmt::Display for UnknownAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown adapter '{}' (expected one of: mock, openai, claude, google, ollama)",
            self.0
        )
    }
}

impl std::error::Error for UnknownAdapter {}

impl FromStr for AdapterKind {
    type Err = UnknownAdapter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "demo" => Ok(AdapterKind::Mock),
            "openai" => Ok(AdapterKind::OpenAi),
            "claude" | "anthropic" => Ok(AdapterKind::Claude),
            "google" | "gemini" => Ok(AdapterKind::Google),
            "ollama" | "local" => Ok(AdapterKind::Ollama),
            _ => Err(UnknownAdapter(s.to_string())),
        }
    }
}

/// Build the backend for `kind` from stored credentials and endpoint.
pub fn create_adapter(
    kind: AdapterKind,
    store: &Store,
    config: &AdapterConfig,
) -> StoreResult<Box<dyn VisionAdapter>> {
    let adapter: Box<dyn VisionAdapter> = match kind {
        AdapterKind::Mock => Box::new(MockAdapter::new(config.mock_latency())),
        AdapterKind::OpenAi => Box::new(OpenAiAdapter::new(store.api_key(kind.key())?, config)),
        AdapterKind::Claude => {
            Box::new(AnthropicAdapter::new(store.api_key(kind.key())?, config))
        }
        AdapterKind::Google => Box::new(GeminiAdapter::new(store.api_key(kind.key())?, config)),
        AdapterKind::Ollama => Box::new(LocalAdapter::new(&store.local_endpoint()?, config)),
    };
    Ok(adapter)
}

/// The backend and model a run should use.
pub struct Selection<'a> {
    pub kind: AdapterKind,
    pub adapter: &'a dyn VisionAdapter,
    pub model: String,
}

/// Lookup table of backends by kind.
pub struct AdapterRegistry {
    adapters: HashMap<AdapterKind, Box<dyn VisionAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Every backend, built from the credentials currently in the store.
    pub fn from_store(store: &Store, config: &AdapterConfig) -> StoreResult<Self> {
        let mut registry = Self::new();
        for kind in AdapterKind::ALL {
            registry.insert(kind, create_adapter(kind, store, config)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, kind: AdapterKind, adapter: Box<dyn VisionAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: AdapterKind) -> Option<&dyn VisionAdapter> {
        self.adapters.get(&kind).map(|adapter| adapter.as_ref())
    }

    /// The stored adapter and model selection. Falls back to the offline
    /// backend when nothing (or something unknown) is stored, and to the
    /// backend's first model when the stored one is not offered.
    pub fn selected(&self, store: &Store) -> StoreResult<Option<Selection<'_>>> {
        let kind = store
            .selected_adapter()?
            .and_then(|key| key.parse::<AdapterKind>().ok())
            .unwrap_or(AdapterKind::Mock);

        let Some(adapter) = self.get(kind) else {
            return Ok(None);
        };

        let models = adapter.models();
        let model = match store.selected_model()? {
            Some(model) if kind == AdapterKind::Ollama || models.contains(&model) => model,
            _ => models
                .first()
                .cloned()
                .unwrap_or_else(|| kind.default_models()[0].to_string()),
        };

        Ok(Some(Selection {
            kind,
            adapter,
            model,
        }))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
