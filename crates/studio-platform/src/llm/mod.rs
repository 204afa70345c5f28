pub mod openai_compat;

pub use openai_compat::OpenAiCompatClient;

use studio_core::ports::{LlmClient, LlmFactory};
use studio_types::{
    Result,
    config::{LlmConfig, LlmProvider},
    message::Message,
};

/// Builds one `OpenAiCompatClient` per conversation, picking the provider
/// from the requested base model.
///
/// A family name (`gemini`, `llama`, `gpt`) selects that provider with its
/// default model; any other non-empty name is sent to the endpoint as the
/// model itself. Unknown names stay on the configured provider.
pub struct ProviderFactory {
    http: reqwest::Client,
    config: LlmConfig,
}

impl ProviderFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn resolve(&self, base_model: &str) -> LlmConfig {
        let mut config = self.config.clone();
        let base_model = base_model.trim();

        if let Some(provider) = LlmProvider::for_base_model(base_model) {
            if provider != config.provider {
                config.provider = provider;
                config.api_base = None;
                config.model = provider.default_model().to_string();
            }
        }
        if !base_model.is_empty() && !is_family_name(base_model) {
            config.model = base_model.to_string();
        }
        config
    }
}

impl LlmFactory for ProviderFactory {
    fn create(&self, base_model: &str, history: Vec<Message>) -> Result<Box<dyn LlmClient>> {
        let config = self.resolve(base_model);
        log::info!(
            "LLM client: {} / {} ({} messages of history)",
            config.provider.label(),
            config.model,
            history.len()
        );
        Ok(Box::new(OpenAiCompatClient::new(self.http.clone(), config, history)))
    }
}

fn is_family_name(base_model: &str) -> bool {
    matches!(
        base_model.to_ascii_lowercase().as_str(),
        "gemini" | "llama" | "gpt"
    )
}
