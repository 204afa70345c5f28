//! Agent runtime: the conversation loop.
//!
//! Implements the prompt → process → decide cycle:
//! 1. Send the current prompt to the LLM
//! 2. Hand the raw reply to a fresh `Processor`
//! 3. `Continue` feeds the processor's text back as the next prompt,
//!    `Error` feeds back a corrective instruction (bounded),
//!    `Terminate` ends the loop
//! 4. Persist the session and return the artifacts

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use studio_types::{
    AgentError, Result,
    directive::DirectiveErrorKind,
    event::AgentEvent,
    message::seeded_history,
    session::{AgentOutput, SessionData, SessionUpdate},
};

use crate::context::AppContext;
use crate::event_bus::EventBus;
use crate::ports::{LlmClient, BASE_PROMPT};
use crate::processor::{NextAction, Processor};
use crate::retry::call_with_retry;

pub const FAILURE_MARKER: &str = "AGENT FAILURE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Thinking,
    Processing,
    Cancelled,
    Error(String),
}

/// One conversation on one session.
///
/// The agent holds the session's lock from `start` until it is dropped, so
/// two requests on the same session never interleave their history updates.
pub struct Agent {
    ctx: Arc<AppContext>,
    llm: Box<dyn LlmClient>,
    session_data: SessionData,
    event_bus: EventBus,
    pub state: AgentState,
    _session_guard: OwnedMutexGuard<()>,
}

impl Agent {
    /// Resolve or create the session and build an LLM client seeded with its
    /// history. An empty `session_id` starts a new session.
    pub async fn start(
        ctx: Arc<AppContext>,
        base_model: &str,
        username: &str,
        session_id: &str,
    ) -> Result<Self> {
        let sessions = &ctx.sessions;
        let (session_id, guard) = if session_id.is_empty() {
            let id = sessions.add_session("").await?;
            let guard = sessions.session_lock(&id).lock_owned().await;
            (id, guard)
        } else {
            let guard = sessions.session_lock(session_id).lock_owned().await;
            match sessions.add_session(session_id).await {
                Ok(id) => (id, guard),
                Err(e) => {
                    drop(guard);
                    sessions.release_lock(session_id);
                    return Err(e);
                }
            }
        };

        let mut history = sessions.get_session_history(&session_id).await?;
        if history.is_empty() {
            history = seeded_history(ctx.prompts.get(BASE_PROMPT)?);
        }
        let llm = ctx.llm_factory.create(base_model, history)?;

        Ok(Self {
            session_data: SessionData::new(session_id, username),
            ctx,
            llm,
            event_bus: EventBus::new(),
            state: AgentState::Idle,
            _session_guard: guard,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_data.session_id
    }

    pub fn session_data(&self) -> &SessionData {
        &self.session_data
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Run the conversation to completion.
    pub async fn run(&mut self, initial_prompt: &str) -> Result<AgentOutput> {
        self.run_until(initial_prompt, futures::future::pending::<()>()).await
    }

    /// Run the conversation, giving up once `deadline` has elapsed.
    pub async fn run_with_deadline(
        &mut self,
        initial_prompt: &str,
        deadline: Duration,
    ) -> Result<AgentOutput> {
        match self.run_until(initial_prompt, tokio::time::sleep(deadline)).await {
            Err(AgentError::Cancelled) => Err(AgentError::Timeout(deadline.as_millis() as u64)),
            other => other,
        }
    }

    /// Run the conversation until it finishes or `cancel` resolves.
    ///
    /// On cancellation the partial session data stays readable through
    /// `session_data`, the LLM history is written back to the cache, and
    /// nothing is saved to the store.
    pub async fn run_until<C>(&mut self, initial_prompt: &str, cancel: C) -> Result<AgentOutput>
    where
        C: Future<Output = ()>,
    {
        let session_id = self.session_id().to_string();
        self.event_bus.emit(AgentEvent::TurnStart { session_id: session_id.clone() });

        let finished = tokio::select! {
            _ = self.turn_loop(initial_prompt) => true,
            _ = cancel => false,
        };

        if !finished {
            log::warn!("Run on session {} cancelled", session_id);
            self.state = AgentState::Cancelled;
            self.ctx
                .sessions
                .set_session_history(&session_id, self.llm.history())
                .await;
            self.event_bus.emit(AgentEvent::TurnEnd { session_id });
            return Err(AgentError::Cancelled);
        }

        self.persist().await;
        self.event_bus.emit(AgentEvent::TurnEnd { session_id });
        Ok(self.session_data.output())
    }

    async fn turn_loop(&mut self, initial_prompt: &str) {
        let retry = self.ctx.config.retry.clone();
        let max_corrective = self.ctx.config.max_corrective_retries;
        let mut prompt = initial_prompt.to_string();
        let mut corrective_attempts = 0;

        for _ in 0..self.ctx.config.max_iterations.max(1) {
            self.state = AgentState::Thinking;
            self.session_data
                .set(SessionUpdate::default().current_prompt(prompt.clone()));

            let llm = self.llm.as_ref();
            let reply = match call_with_retry(&retry, "llm.prompt", || llm.prompt(&prompt)).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.event_bus.emit(AgentEvent::Error { message: e.to_string() });
                    self.fail(DirectiveErrorKind::ExternalCallFailure.label());
                    return;
                }
            };
            log::debug!("LLM reply: {}", reply);
            self.event_bus.emit(AgentEvent::LlmComplete { text: reply.clone() });

            self.state = AgentState::Processing;
            let action = Processor::new(
                &mut self.session_data,
                &self.ctx,
                self.llm.as_ref(),
                &self.event_bus,
            )
            .process(&reply)
            .await;

            match action {
                NextAction::Terminate => {
                    self.state = AgentState::Idle;
                    return;
                }
                NextAction::Continue(next) => {
                    corrective_attempts = 0;
                    prompt = next;
                }
                NextAction::Error(kind) => {
                    if corrective_attempts >= max_corrective {
                        self.fail(kind.label());
                        return;
                    }
                    corrective_attempts += 1;
                    log::info!("Corrective retry {} after {}", corrective_attempts, kind);
                    self.event_bus.emit(AgentEvent::CorrectiveRetry {
                        attempt: corrective_attempts,
                        kind,
                    });
                    prompt = corrective_prompt(kind).to_string();
                }
            }
        }

        self.fail("max iterations reached");
    }

    fn fail(&mut self, reason: &str) {
        let message = format!("{}: {}", FAILURE_MARKER, reason);
        log::warn!("Session {}: {}", self.session_data.session_id, message);
        self.session_data.set(SessionUpdate::default().message(message.clone()));
        self.state = AgentState::Error(message);
    }

    /// Write the history back to the cache and, when an image description was
    /// produced, to the durable store. Store failures are logged only.
    async fn persist(&mut self) {
        let sd = &self.session_data;
        self.ctx
            .sessions
            .set_session_history(&sd.session_id, self.llm.history())
            .await;

        if sd.image_description.is_empty() {
            return;
        }
        let saved = self
            .ctx
            .sessions
            .save_session(&sd.session_id, &sd.username, &sd.image_description, &sd.summary)
            .await;
        if let Err(e) = saved {
            log::error!("Session {} not persisted: {}", sd.session_id, e);
            self.event_bus.emit(AgentEvent::Error { message: e.to_string() });
        }
    }
}

/// Instruction sent back to the LLM after a reply it has to redo.
pub fn corrective_prompt(kind: DirectiveErrorKind) -> &'static str {
    match kind {
        DirectiveErrorKind::ParseError => {
            "Your last reply was not valid JSON. Reply with exactly one JSON object \
             of the form {\"state\": <0-4>, ...} and nothing else."
        }
        DirectiveErrorKind::SchemaViolation => {
            "Your last reply was missing a field its state requires. EXIT needs \
             \"summary\", MEM_RECALL needs \"data\": {\"intent\"}, IMAGE needs \"image\", \
             QUERY needs \"query\". Send the directive again."
        }
        DirectiveErrorKind::UnknownState => {
            "Your last reply used an unknown state. Valid states are 0 (EXIT), \
             1 (MEM_RECALL), 2 (IMAGE), 3 (MODEL) and 4 (QUERY). Send the directive again."
        }
        DirectiveErrorKind::ExternalCallFailure => {
            "The requested action failed. Pick another action, or reply with state 4 \
             and a message explaining the problem to the user."
        }
    }
}
