pub mod message;
pub mod directive;
pub mod event;
pub mod config;
pub mod error;
pub mod session;


pub use error::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
