use serde::{Deserialize, Serialize};

use crate::directive::{DirectiveErrorKind, DirectiveState};

/// Kind of artifact a handler produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    ImageDescription,
    Image,
    Object,
}

/// Events emitted by the agent while it runs a conversation.
/// Observers drain these for progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A run started for this session
    TurnStart { session_id: String },

    /// LLM finished a complete response
    LlmComplete { text: String },

    /// A directive was parsed and handed to its handler
    DirectiveDispatched { state: DirectiveState },

    /// A handler stored a new artifact in the session data
    ArtifactGenerated { kind: ArtifactKind },

    /// A bad directive was answered with a corrective prompt
    CorrectiveRetry { attempt: u32, kind: DirectiveErrorKind },

    /// The run finished
    TurnEnd { session_id: String },

    /// An error occurred
    Error { message: String },
}
