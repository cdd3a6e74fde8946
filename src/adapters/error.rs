use thiserror::Error;

/// Failures an adapter reports to its caller.
///
/// Malformed model output is not among them: it is absorbed by
/// normalization and never surfaces as an error.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Missing credential or unreachable local backend, detected before any
    /// analysis request is sent.
    #[error("{adapter} is not configured: {reason}")]
    Configuration { adapter: &'static str, reason: String },

    /// The request never produced an HTTP response.
    #[error("{adapter} request failed: {message}")]
    Transport { adapter: &'static str, message: String },

    /// The backend answered with a non-success status. `message` is the
    /// backend's own error text when it supplied one.
    #[error("{message}")]
    Backend {
        adapter: &'static str,
        status: u16,
        message: String,
    },

    #[error("{0} does not support chat")]
    ChatUnsupported(&'static str),

    #[error("invalid image data: {0}")]
    InvalidImage(String),
}

impl AdapterError {
    pub fn missing_key(adapter: &'static str) -> Self {
        AdapterError::Configuration {
            adapter,
            reason: format!("{} API key not configured", adapter),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AdapterError::Configuration { .. })
    }
}
