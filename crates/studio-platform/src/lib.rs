//! Native adapters for the studio agent.
//!
//! Each module implements one of the port traits from `studio_core::ports`:
//! - `llm`: OpenAI-compatible chat completions over reqwest
//! - `storage`: session store kept in memory, optionally snapshotted to disk
//! - `generator`: text-to-image and image-to-3D HTTP services
//! - `prompts`: prompt templates from a directory or an in-memory map

pub mod generator;
pub mod llm;
pub mod prompts;
pub mod storage;


pub use generator::HttpGenerator;
pub use llm::{OpenAiCompatClient, ProviderFactory};
pub use prompts::{FilePromptManager, StaticPromptManager};
pub use storage::{open_store, MemoryStore};
