//! Prompt template sources.

use std::collections::HashMap;
use std::path::Path;

use studio_core::ports::{PromptManager, BASE_PROMPT, IMAGE_PROMPT};
use studio_types::{AgentError, Result};

/// Templates read once from `<dir>/<key>.txt`.
pub struct FilePromptManager {
    prompts: HashMap<String, String>,
}

impl FilePromptManager {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut prompts = HashMap::new();
        for key in [BASE_PROMPT, IMAGE_PROMPT] {
            let path = dir.join(format!("{}.txt", key));
            let text = std::fs::read_to_string(&path)
                .map_err(|e| AgentError::PromptNotFound(format!("{}: {}", path.display(), e)))?;
            prompts.insert(key.to_string(), text);
        }
        log::info!("Loaded {} prompt templates from {}", prompts.len(), dir.display());
        Ok(Self { prompts })
    }
}

impl PromptManager for FilePromptManager {
    fn get(&self, key: &str) -> Result<String> {
        self.prompts
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::PromptNotFound(key.to_string()))
    }
}

/// Templates held in memory.
#[derive(Default)]
pub struct StaticPromptManager {
    prompts: HashMap<String, String>,
}

impl StaticPromptManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.prompts.insert(key.into(), text.into());
        self
    }
}

impl PromptManager for StaticPromptManager {
    fn get(&self, key: &str) -> Result<String> {
        self.prompts
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::PromptNotFound(key.to_string()))
    }
}
