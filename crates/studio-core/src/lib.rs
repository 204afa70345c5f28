//! Core of the studio agent: the turn loop, the directive processor and the
//! session registry. Everything outside the process is reached through the
//! traits in [`ports`].

pub mod context;
pub mod event_bus;
pub mod ports;
pub mod processor;
pub mod retry;
pub mod runtime;
pub mod session_manager;

#[cfg(test)]
mod tests;

pub use context::AppContext;
pub use processor::{NextAction, Processor};
pub use runtime::{Agent, AgentState};
pub use session_manager::SessionManager;
