use serde::{Deserialize, Serialize};
use crate::message::Message;

/// Outputs accumulated over one `run` of the agent.
///
/// Fields only ever move forward: `set` ignores empty values, so once a field
/// holds something it cannot be cleared for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub username: String,
    pub message: String,
    /// Base64-encoded image bytes
    pub image: String,
    /// Base64-encoded 3D render bytes
    pub object: String,
    pub image_description: String,
    pub summary: String,
    pub current_prompt: String,
}

/// A partial update to `SessionData`. Unset or empty fields are no-ops.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub message: Option<String>,
    pub image: Option<String>,
    pub object: Option<String>,
    pub image_description: Option<String>,
    pub summary: Option<String>,
    pub current_prompt: Option<String>,
}

impl SessionUpdate {
    pub fn message(mut self, v: impl Into<String>) -> Self {
        self.message = Some(v.into());
        self
    }

    pub fn image(mut self, v: impl Into<String>) -> Self {
        self.image = Some(v.into());
        self
    }

    pub fn object(mut self, v: impl Into<String>) -> Self {
        self.object = Some(v.into());
        self
    }

    pub fn image_description(mut self, v: impl Into<String>) -> Self {
        self.image_description = Some(v.into());
        self
    }

    pub fn summary(mut self, v: impl Into<String>) -> Self {
        self.summary = Some(v.into());
        self
    }

    pub fn current_prompt(mut self, v: impl Into<String>) -> Self {
        self.current_prompt = Some(v.into());
        self
    }
}

impl SessionData {
    pub fn new(session_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn set(&mut self, update: SessionUpdate) {
        merge(&mut self.message, update.message);
        merge(&mut self.image, update.image);
        merge(&mut self.object, update.object);
        merge(&mut self.image_description, update.image_description);
        merge(&mut self.summary, update.summary);
        merge(&mut self.current_prompt, update.current_prompt);
    }

    pub fn output(&self) -> AgentOutput {
        AgentOutput {
            message: self.message.clone(),
            image: self.image.clone(),
            object: self.object.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

fn merge(slot: &mut String, value: Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            *slot = v;
        }
    }
}

/// What one conversation hands back to its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub message: String,
    pub image: String,
    pub object: String,
    pub session_id: String,
}

/// A session as kept by the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub username: String,
    pub image_description: String,
    pub summary: String,
    pub history: Vec<Message>,
    pub updated_at: String,
}

impl StoredSession {
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        image_description: impl Into<String>,
        summary: impl Into<String>,
        history: Vec<Message>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            image_description: image_description.into(),
            summary: summary.into(),
            history,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Mint a fresh opaque session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
