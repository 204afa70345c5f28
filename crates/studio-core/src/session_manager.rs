//! Process-wide session registry.
//!
//! Keeps conversation histories in a bounded in-memory cache. A miss on a
//! known id hydrates from the store; a full cache evicts the least recently
//! used session and hands its history back to the store.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use studio_types::{
    AgentError, Result,
    config::RetryPolicy,
    message::{seeded_history, Message},
    session::{new_session_id, StoredSession},
};

use crate::ports::{PromptManager, SessionStore, BASE_PROMPT};
use crate::retry::call_with_retry;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    prompts: Arc<dyn PromptManager>,
    retry: RetryPolicy,
    cache: Mutex<LruCache<String, Vec<Message>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        prompts: Arc<dyn PromptManager>,
        retry: RetryPolicy,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            prompts,
            retry,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session and return its effective id.
    ///
    /// An empty id mints a new session seeded with the base prompt. A known id
    /// is a no-op; an unknown one is hydrated from the store.
    pub async fn add_session(&self, session_id: &str) -> Result<String> {
        if session_id.is_empty() {
            let session_id = new_session_id();
            let history = seeded_history(self.prompts.get(BASE_PROMPT)?);
            log::info!("New session initiated: {}", session_id);
            self.insert(&session_id, history).await;
            return Ok(session_id);
        }

        if self.contains(session_id) {
            return Ok(session_id.to_string());
        }

        log::info!("Loading session {} from {}", session_id, self.store.backend_name());
        let mut history = self.fetch_history(session_id).await?;
        if history.is_empty() {
            log::warn!("Session {} not found in store; seeding a new history", session_id);
            history = seeded_history(self.prompts.get(BASE_PROMPT)?);
        }
        // Another caller may have hydrated it while we were waiting on the store.
        if !self.contains(session_id) {
            self.insert(session_id, history).await;
        }
        Ok(session_id.to_string())
    }

    /// Cached history, falling back to the store on a miss.
    pub async fn get_session_history(&self, session_id: &str) -> Result<Vec<Message>> {
        let cached = self.cache().get(session_id).cloned();
        if let Some(history) = cached {
            log::debug!("Session {} history served from memory", session_id);
            return Ok(history);
        }
        log::info!("Session {} history loaded from {}", session_id, self.store.backend_name());
        self.fetch_history(session_id).await
    }

    pub async fn set_session_history(&self, session_id: &str, history: Vec<Message>) {
        log::info!("Session history modified: {}", session_id);
        self.insert(session_id, history).await;
    }

    /// Write the session and its cached history to the durable store.
    pub async fn save_session(
        &self,
        session_id: &str,
        username: &str,
        image_description: &str,
        summary: &str,
    ) -> Result<()> {
        log::info!("Saving session {}", session_id);
        let history = self
            .get_session_history(session_id)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        let record = StoredSession::new(session_id, username, image_description, summary, history);

        call_with_retry(&self.retry, "store.save_session", || {
            self.store.save_session(record.clone())
        })
        .await
        .map_err(|e| AgentError::Persistence(e.to_string()))
    }

    /// Lock serializing every conversation on one session.
    pub fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.cache().contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fetch_history(&self, session_id: &str) -> Result<Vec<Message>> {
        call_with_retry(&self.retry, "store.get_conversation_history", || {
            self.store.get_conversation_history(session_id)
        })
        .await
    }

    async fn insert(&self, session_id: &str, history: Vec<Message>) {
        // `push` hands back the old value when the id was already cached.
        let evicted = self
            .cache()
            .push(session_id.to_string(), history)
            .filter(|(id, _)| id != session_id);
        if let Some((evicted_id, history)) = evicted {
            log::info!("Evicting session {} from cache", evicted_id);
            self.release_lock(&evicted_id);
            let saved = call_with_retry(&self.retry, "store.save_history", || {
                self.store.save_history(&evicted_id, history.clone())
            })
            .await;
            if let Err(e) = saved {
                log::error!("Failed to persist evicted session {}: {}", evicted_id, e);
            }
        }
    }

    /// Forget the lock of a session unless someone still holds it.
    pub(crate) fn release_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(session_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(session_id);
        }
    }

    pub(crate) fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, Vec<Message>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
