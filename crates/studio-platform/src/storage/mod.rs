pub mod memory;

pub use memory::MemoryStore;

use studio_types::{config::SessionConfig, Result};

/// Pick the store backend from configuration.
pub async fn open_store(config: &SessionConfig) -> Result<MemoryStore> {
    match &config.store_path {
        Some(path) => {
            log::info!("Using file-backed session store at {}", path);
            MemoryStore::open(path).await
        }
        None => {
            log::info!("Using in-memory session store");
            Ok(MemoryStore::new())
        }
    }
}
