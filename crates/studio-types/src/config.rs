use serde::{Deserialize, Serialize};

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub session: SessionConfig,
    pub generator: GeneratorConfig,
    /// Directory holding `BasePrompt.txt` and `ImagePrompt.txt`
    pub prompts_dir: String,
    /// Corrective prompts sent after a bad directive before giving up
    pub max_corrective_retries: u32,
    /// Upper bound on LLM round trips in one run
    pub max_iterations: u32,
    /// Deadline for a whole run, in milliseconds. Zero disables it.
    pub turn_deadline_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            session: SessionConfig::default(),
            generator: GeneratorConfig::default(),
            prompts_dir: "prompts".to_string(),
            max_corrective_retries: 2,
            max_iterations: 16,
            turn_deadline_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: String,
    pub api_base: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Google,
            model: "gemini-2.0-flash".to_string(),
            api_key: String::new(),
            api_base: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    Google,
    OpenAI,
    Ollama,
    Custom,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &str {
        match self {
            LlmProvider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Custom => "",
        }
    }

    pub fn default_model(&self) -> &str {
        match self {
            LlmProvider::Google => "gemini-2.0-flash",
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Ollama => "llama3.2:1b",
            LlmProvider::Custom => "",
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LlmProvider::Google => "Google",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Ollama => "Ollama",
            LlmProvider::Custom => "Custom",
        }
    }

    /// Pick a provider from the base model name a request asks for.
    pub fn for_base_model(base_model: &str) -> Option<Self> {
        let lower = base_model.to_ascii_lowercase();
        if lower.starts_with("gemini") {
            Some(LlmProvider::Google)
        } else if lower.contains("llama") {
            Some(LlmProvider::Ollama)
        } else if lower.starts_with("gpt") {
            Some(LlmProvider::OpenAI)
        } else {
            None
        }
    }
}

/// Timeout and backoff applied to every external call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            call_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        std::time::Duration::from_millis(delay_ms)
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions kept in memory before the least recently used is evicted
    pub cache_capacity: usize,
    /// JSON snapshot backing the session store. `None` keeps it in memory only.
    pub store_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub image_endpoint: String,
    pub render_endpoint: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            image_endpoint: "http://localhost:8888/text-to-image".to_string(),
            render_endpoint: "http://localhost:8888/image-to-3d".to_string(),
        }
    }
}
