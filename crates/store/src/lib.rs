use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

pub mod local;
pub mod mock;
pub mod traits;

pub use local::*;
pub use mock::*;
pub use traits::*;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Local,
    Mock,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub staging_dir: PathBuf,
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./staging"),
            backend: StoreBackend::Local,
        }
    }
}

pub fn create_part_store(config: StoreConfig) -> Result<Arc<dyn PartStore>> {
    match config.backend {
        StoreBackend::Local => Ok(Arc::new(LocalPartStore::new(config)?)),
        StoreBackend::Mock => Ok(Arc::new(MockPartStore::new())),
    }
}
