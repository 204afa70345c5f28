use thiserror::Error;

use crate::directive::DirectiveErrorKind;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Directive parse error: {0}")]
    Parse(String),

    #[error("Directive schema violation: {0}")]
    SchemaViolation(String),

    #[error("Unknown directive state: {0}")]
    UnknownState(i128),

    #[error("External call failed: {0}")]
    ExternalCall(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// How the directive processor classifies this error when it surfaces
    /// inside a turn.
    pub fn directive_kind(&self) -> DirectiveErrorKind {
        match self {
            AgentError::Parse(_) | AgentError::Serialization(_) => DirectiveErrorKind::ParseError,
            AgentError::SchemaViolation(_) => DirectiveErrorKind::SchemaViolation,
            AgentError::UnknownState(_) => DirectiveErrorKind::UnknownState,
            _ => DirectiveErrorKind::ExternalCallFailure,
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization(e.to_string())
    }
}
