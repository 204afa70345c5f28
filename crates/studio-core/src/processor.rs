//! Directive processor: turns one raw LLM reply into a `NextAction`.
//!
//! 1. Parse the reply into a `Directive` (fence stripping, schema checks)
//! 2. Dispatch to the handler for its state
//! 3. The handler mutates `SessionData` and decides whether the
//!    conversation continues
//!
//! A processor lives for exactly one reply.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use studio_types::{
    AgentError, Result,
    directive::{Directive, DirectiveErrorKind},
    event::{AgentEvent, ArtifactKind},
    session::{SessionData, SessionUpdate},
};

use crate::context::AppContext;
use crate::event_bus::EventBus;
use crate::ports::{LlmClient, IMAGE_PROMPT};
use crate::retry::call_with_retry;

pub const IMAGE_GENERATED: &str = "IMAGE GENERATED";
pub const MODEL_GENERATED: &str = "MODEL GENERATED";

/// What the agent loop should do after a reply has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Send this text to the LLM as the next user turn
    Continue(String),
    Terminate,
    Error(DirectiveErrorKind),
}

pub struct Processor<'a> {
    session_data: &'a mut SessionData,
    ctx: &'a AppContext,
    llm: &'a dyn LlmClient,
    events: &'a EventBus,
}

impl<'a> Processor<'a> {
    pub fn new(
        session_data: &'a mut SessionData,
        ctx: &'a AppContext,
        llm: &'a dyn LlmClient,
        events: &'a EventBus,
    ) -> Self {
        Self { session_data, ctx, llm, events }
    }

    pub async fn process(&mut self, raw: &str) -> NextAction {
        let directive = match Directive::parse(raw) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Processor: rejected directive: {}", e);
                return NextAction::Error(e.directive_kind());
            }
        };

        let state = directive.state();
        log::info!("Processor: dispatching {}", state.label());
        self.events.emit(AgentEvent::DirectiveDispatched { state });

        let outcome = match directive {
            Directive::Exit { summary } => Ok(self.exit(summary)),
            Directive::MemRecall { intent } => self.recall_from_memory(&intent).await,
            Directive::Image { intent } => self.generate_image(&intent).await,
            Directive::Model => self.generate_model().await,
            Directive::Query { query } => Ok(self.process_query(query)),
        };

        outcome.unwrap_or_else(|e| {
            log::warn!("Processor: {} handler failed: {}", state.label(), e);
            self.events.emit(AgentEvent::Error { message: e.to_string() });
            NextAction::Error(DirectiveErrorKind::ExternalCallFailure)
        })
    }

    fn exit(&mut self, summary: String) -> NextAction {
        self.session_data.set(SessionUpdate::default().summary(summary));
        NextAction::Terminate
    }

    fn process_query(&mut self, query: String) -> NextAction {
        self.session_data.set(SessionUpdate::default().message(query));
        NextAction::Terminate
    }

    async fn recall_from_memory(&mut self, intent: &str) -> Result<NextAction> {
        let store = &self.ctx.store;
        let description = call_with_retry(&self.ctx.config.retry, "store.get_image_description", || {
            store.get_image_description(intent)
        })
        .await?;

        self.session_data
            .set(SessionUpdate::default().image_description(description.clone()));
        self.events.emit(AgentEvent::ArtifactGenerated {
            kind: ArtifactKind::ImageDescription,
        });
        Ok(NextAction::Continue(description))
    }

    async fn generate_image(&mut self, intent: &str) -> Result<NextAction> {
        let retry = &self.ctx.config.retry;
        let template = self.ctx.prompts.get(IMAGE_PROMPT)?;
        let parts = vec![template, intent.to_string()];

        let llm = self.llm;
        let description =
            call_with_retry(retry, "llm.generate_content", || llm.generate_content(&parts)).await?;
        if description.trim().is_empty() {
            return Err(AgentError::Llm("empty image description".to_string()));
        }
        self.session_data
            .set(SessionUpdate::default().image_description(description.clone()));
        self.events.emit(AgentEvent::ArtifactGenerated {
            kind: ArtifactKind::ImageDescription,
        });

        let generator = &self.ctx.generator;
        let image = call_with_retry(retry, "generator.generate_image", || {
            generator.generate_image(&description)
        })
        .await?;
        self.session_data
            .set(SessionUpdate::default().image(BASE64.encode(image)));
        self.events.emit(AgentEvent::ArtifactGenerated { kind: ArtifactKind::Image });

        log::info!("Processor: image generated");
        Ok(NextAction::Continue(IMAGE_GENERATED.to_string()))
    }

    async fn generate_model(&mut self) -> Result<NextAction> {
        let generator = &self.ctx.generator;
        let image = self.session_data.image.clone();
        let object = call_with_retry(&self.ctx.config.retry, "generator.generate_3drender", || {
            generator.generate_3drender(&image)
        })
        .await?;
        self.session_data
            .set(SessionUpdate::default().object(BASE64.encode(object)));
        self.events.emit(AgentEvent::ArtifactGenerated { kind: ArtifactKind::Object });

        log::info!("Processor: model generated");
        Ok(NextAction::Continue(MODEL_GENERATED.to_string()))
    }
}
