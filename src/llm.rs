use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod gemini;
#[cfg(feature = "llama")]
pub mod local;

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One message in the conversation with the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.role.as_str(), self.content)
    }
}

// ---------------------------------------------------------------------------
// Generation settings
// ---------------------------------------------------------------------------

/// Every reply is requested as a JSON document.
pub const RESPONSE_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { temperature: 0.9 }
    }
}

// ---------------------------------------------------------------------------
// Client boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Rate limits and server-side failures may clear up; other HTTP
    /// statuses (bad request, auth) will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
        }
    }
}

/// Anything that can turn a list of turns into one block of reply text.
///
/// Implementations do no parsing; an empty string is a valid return value
/// and is judged by the caller.
pub trait ModelClient {
    fn generate_structured(
        &mut self,
        turns: &[Turn],
        config: &GenerationConfig,
    ) -> Result<String, ClientError>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

impl<C: ModelClient + ?Sized> ModelClient for Box<C> {
    fn generate_structured(
        &mut self,
        turns: &[Turn],
        config: &GenerationConfig,
    ) -> Result<String, ClientError> {
        (**self).generate_structured(turns, config)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_display() {
        assert_eq!(Turn::user("hi").to_string(), "[user]: hi");
        assert_eq!(Turn::model("{}").to_string(), "[model]: {}");
    }

    #[test]
    fn test_default_generation_config() {
        let config = GenerationConfig::default();
        assert!((config.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_only_transient_statuses_are_retryable() {
        let status = |status| ClientError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_boxed_client_delegates() {
        let mut boxed: Box<dyn ModelClient> = Box::new(scripted::ScriptedClient::ok(["a"]));
        let reply = boxed
            .generate_structured(&[Turn::user("x")], &GenerationConfig::default())
            .unwrap();
        assert_eq!(reply, "a");
        assert_eq!(boxed.name(), "scripted");
    }
}
