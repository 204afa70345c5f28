//! HTTP generator adapter.
//!
//! Text-to-image and image-to-3D are two independent services. Each takes a
//! small JSON body and answers with the raw artifact bytes.

use async_trait::async_trait;
use serde_json::{json, Value};

use studio_core::ports::Generator;
use studio_types::{config::GeneratorConfig, AgentError, Result};

pub struct HttpGenerator {
    http: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn post(&self, url: &str, body: Value) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AgentError::Generator(format!("{} -> HTTP {}: {}", url, status, text)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(AgentError::Generator(format!("{} returned an empty body", url)));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate_image(&self, description: &str) -> Result<Vec<u8>> {
        log::info!("Generating image ({} chars of description)", description.len());
        self.post(&self.config.image_endpoint, json!({ "prompt": description }))
            .await
    }

    async fn generate_3drender(&self, image_base64: &str) -> Result<Vec<u8>> {
        if image_base64.is_empty() {
            return Err(AgentError::Generator("no image to render".to_string()));
        }
        log::info!("Generating 3D render");
        self.post(&self.config.render_endpoint, json!({ "input_image": image_base64 }))
            .await
    }
}
