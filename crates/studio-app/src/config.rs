//! Configuration loading: TOML file first, then environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use studio_types::config::AgentConfig;

pub const CONFIG_FILE: &str = "studio.toml";
pub const API_KEY_ENV: &str = "STUDIO_API_KEY";

/// Load the configuration from `path` (or `studio.toml` in the working
/// directory). A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    let mut config = match std::fs::read_to_string(&path) {
        Ok(text) => parse_config(&text)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} not found, using default configuration", path.display());
            AgentConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("cannot read {}", path.display()));
        }
    };

    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn parse_config(text: &str) -> anyhow::Result<AgentConfig> {
    Ok(toml::from_str(text)?)
}

pub fn apply_env(config: &mut AgentConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
        log::info!("LLM API key taken from {}", API_KEY_ENV);
        config.llm.api_key = key;
    }
}
