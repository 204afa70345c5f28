//! Composition root: builds the shared context once and runs requests on it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use studio_core::{event_bus::EventBus, Agent, AppContext};
use studio_platform::{open_store, FilePromptManager, HttpGenerator, ProviderFactory};
use studio_types::{config::AgentConfig, session::AgentOutput, AgentError, Result};

static CONTEXT: OnceCell<Arc<AppContext>> = OnceCell::const_new();

/// One user request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    pub prompt: String,
    pub username: String,
    /// Empty starts a new session
    pub session_id: String,
    /// Model family or model name; empty uses the configured one
    pub base_model: String,
}

/// Wire the platform adapters into a context. Fails if the prompt templates
/// cannot be read or the store is unreachable.
pub async fn build_context(config: AgentConfig) -> Result<AppContext> {
    let store = open_store(&config.session).await?;
    let prompts = FilePromptManager::load(&config.prompts_dir)?;
    let generator = HttpGenerator::new(config.generator.clone());
    let llm_factory = ProviderFactory::new(config.llm.clone());

    AppContext::builder(config)
        .store(Arc::new(store))
        .generator(Arc::new(generator))
        .prompts(Arc::new(prompts))
        .llm_factory(Arc::new(llm_factory))
        .build()
        .await
}

/// Initialize the process-wide context. Later calls return the first one.
pub async fn init(config: AgentConfig) -> Result<Arc<AppContext>> {
    CONTEXT
        .get_or_try_init(|| async move { build_context(config).await.map(Arc::new) })
        .await
        .map(Arc::clone)
}

/// Run a request on the process-wide context set up by [`init`].
pub async fn execute(request: ExecuteRequest) -> Result<AgentOutput> {
    let ctx = CONTEXT
        .get()
        .cloned()
        .ok_or_else(|| AgentError::Config("application context is not initialized".to_string()))?;
    execute_with(ctx, request).await
}

/// Run a request on an explicit context, bounded by `turn_deadline_ms`.
pub async fn execute_with(ctx: Arc<AppContext>, request: ExecuteRequest) -> Result<AgentOutput> {
    let deadline_ms = ctx.config.turn_deadline_ms;
    let mut agent = Agent::start(
        ctx,
        &request.base_model,
        &request.username,
        &request.session_id,
    )
    .await?;
    log::info!(
        "Request from {} on session {}",
        request.username,
        agent.session_id()
    );

    let result = if deadline_ms == 0 {
        agent.run(&request.prompt).await
    } else {
        agent
            .run_with_deadline(&request.prompt, Duration::from_millis(deadline_ms))
            .await
    };
    log_events(agent.event_bus());
    result
}

/// Drain the bus into the debug log. Returns how many events were pending.
pub fn log_events(bus: &EventBus) -> usize {
    let events = bus.drain();
    for event in &events {
        log::debug!("Agent event: {:?}", event);
    }
    events.len()
}
