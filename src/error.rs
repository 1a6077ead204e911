use std::time::Duration;

use crate::llm::ClientError;

/// Why a model turn did not produce a scene.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model response is not a valid scene: {reason}")]
    MalformedResponse { reason: String, raw: String },
    #[error("model request failed: {0}")]
    TransportFailure(String),
    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Failures that may clear up on their own. A malformed scene needs a
    /// different prompt, not another identical request. HTTP statuses that
    /// will not change (bad request, auth) are screened earlier, by
    /// [`ClientError::is_retryable`].
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MalformedResponse { .. })
    }
}

impl From<ClientError> for EngineError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout(after) => Self::Timeout(after),
            other => Self::TransportFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no game in progress; start one first")]
    NotStarted,
    #[error("a game is already in progress")]
    AlreadyStarted,
    #[error("the story has ended; restart to play again")]
    GameOver,
    #[error("no choice with id '{0}' in the current scene")]
    UnknownChoice(String),
}
