//! Simple event bus for decoupled communication between the agent and
//! whoever is watching it.
//!
//! Conversations run on a multi-threaded runtime, so the buffer sits behind
//! `Arc<Mutex<..>>`. Events are buffered and drained by the observer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use studio_types::event::AgentEvent;

/// Shared event bus, cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<VecDeque<AgentEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Publish an event. Called by the agent and its processor.
    pub fn emit(&self, event: AgentEvent) {
        self.queue().push_back(event);
    }

    /// Drain all pending events.
    pub fn drain(&self) -> Vec<AgentEvent> {
        self.queue().drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue().is_empty()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<AgentEvent>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
