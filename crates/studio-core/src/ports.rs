//! Port traits: the hexagonal architecture boundary.
//!
//! These traits are defined here in `studio-core` (pure Rust).
//! Implementations live in `studio-platform`.
//! The core never imports platform code; it only depends on these traits.

use async_trait::async_trait;
use studio_types::{
    Result,
    message::Message,
    session::StoredSession,
};

pub const BASE_PROMPT: &str = "BasePrompt";
pub const IMAGE_PROMPT: &str = "ImagePrompt";

// ─── LLM Port ────────────────────────────────────────────────

/// A conversation with one LLM backend.
///
/// `prompt` is stateful: on success the user text and the model reply are
/// appended to the client's history. A failed call must leave the history
/// untouched so it can be retried.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a user turn and return the model's reply
    async fn prompt(&self, text: &str) -> Result<String>;

    /// Single-shot completion that neither reads nor writes the history
    async fn generate_content(&self, parts: &[String]) -> Result<String>;

    /// Snapshot of the conversation so far
    fn history(&self) -> Vec<Message>;
}

/// Builds a fresh client for a conversation.
pub trait LlmFactory: Send + Sync {
    fn create(&self, base_model: &str, history: Vec<Message>) -> Result<Box<dyn LlmClient>>;
}

// ─── Storage Port ────────────────────────────────────────────

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Description of the stored image that best matches the intent
    async fn get_image_description(&self, intent: &str) -> Result<String>;

    /// History of a stored session; empty when the store has never seen it
    async fn get_conversation_history(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn save_session(&self, record: StoredSession) -> Result<()>;

    /// Refresh the history of a session the store already holds.
    /// Sessions it has never saved are ignored.
    async fn save_history(&self, _session_id: &str, _history: Vec<Message>) -> Result<()> {
        Ok(())
    }

    /// Cheap reachability check, used once at startup
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Name of this backend (for logging/debug)
    fn backend_name(&self) -> &str;
}

// ─── Generator Port ──────────────────────────────────────────

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_image(&self, description: &str) -> Result<Vec<u8>>;

    /// Turn a base64-encoded image into a 3D render
    async fn generate_3drender(&self, image_base64: &str) -> Result<Vec<u8>>;
}

// ─── Prompt Port ─────────────────────────────────────────────

pub trait PromptManager: Send + Sync {
    fn get(&self, key: &str) -> Result<String>;
}
