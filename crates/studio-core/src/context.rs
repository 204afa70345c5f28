//! Application context: the shared collaborators every conversation uses.
//!
//! Built once per process and handed to each `Agent` behind an `Arc`.

use std::sync::Arc;

use studio_types::{config::AgentConfig, AgentError, Result};

use crate::ports::{Generator, LlmFactory, PromptManager, SessionStore, BASE_PROMPT, IMAGE_PROMPT};
use crate::session_manager::SessionManager;

pub struct AppContext {
    pub config: AgentConfig,
    pub store: Arc<dyn SessionStore>,
    pub generator: Arc<dyn Generator>,
    pub prompts: Arc<dyn PromptManager>,
    pub llm_factory: Arc<dyn LlmFactory>,
    pub sessions: SessionManager,
}

impl AppContext {
    pub fn builder(config: AgentConfig) -> AppContextBuilder {
        AppContextBuilder {
            config,
            store: None,
            generator: None,
            prompts: None,
            llm_factory: None,
        }
    }
}

pub struct AppContextBuilder {
    config: AgentConfig,
    store: Option<Arc<dyn SessionStore>>,
    generator: Option<Arc<dyn Generator>>,
    prompts: Option<Arc<dyn PromptManager>>,
    llm_factory: Option<Arc<dyn LlmFactory>>,
}

impl AppContextBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptManager>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn llm_factory(mut self, llm_factory: Arc<dyn LlmFactory>) -> Self {
        self.llm_factory = Some(llm_factory);
        self
    }

    /// Wire the context, failing fast if the store is unreachable or a
    /// required prompt template is missing. The store gets a single ping
    /// bounded by the call timeout, with no retry.
    pub async fn build(self) -> Result<AppContext> {
        let store = self.store.ok_or_else(|| missing("store"))?;
        let generator = self.generator.ok_or_else(|| missing("generator"))?;
        let prompts = self.prompts.ok_or_else(|| missing("prompts"))?;
        let llm_factory = self.llm_factory.ok_or_else(|| missing("llm_factory"))?;

        for key in [BASE_PROMPT, IMAGE_PROMPT] {
            prompts.get(key)?;
        }

        let timeout = self.config.retry.call_timeout();
        match tokio::time::timeout(timeout, store.ping()).await {
            Ok(Ok(())) => log::info!("Session store ready: {}", store.backend_name()),
            Ok(Err(e)) => {
                return Err(AgentError::Storage(format!(
                    "{} unreachable: {}",
                    store.backend_name(),
                    e
                )))
            }
            Err(_) => {
                return Err(AgentError::Storage(format!(
                    "{} did not answer within {}ms",
                    store.backend_name(),
                    self.config.retry.call_timeout_ms
                )))
            }
        }

        let sessions = SessionManager::new(
            store.clone(),
            prompts.clone(),
            self.config.retry.clone(),
            self.config.session.cache_capacity,
        );

        Ok(AppContext {
            config: self.config,
            store,
            generator,
            prompts,
            llm_factory,
            sessions,
        })
    }
}

fn missing(what: &str) -> AgentError {
    AgentError::Config(format!("application context is missing its {}", what))
}
