use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dsr_backend::{Backend, LogBackend, LogConfig, MemoryBackend, SyncMode};
use dsr_protocol::MAX_MESSAGE_SIZE;
use dsr_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Server configuration, usually loaded from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub backend: BackendConfig,
    pub store: StoreConfig,
    /// Largest accepted request payload in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1516)),
            backend: BackendConfig::Memory,
            store: StoreConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(ServerError::Config(format!(
                "max_message_size must be between 1 and {MAX_MESSAGE_SIZE}"
            )));
        }
        if self.store.database.is_empty()
            || self.store.blocks_collection.is_empty()
            || self.store.refs_collection.is_empty()
        {
            return Err(ServerError::Config("collection names must not be empty".into()));
        }
        if self.store.blocks_collection == self.store.refs_collection {
            return Err(ServerError::Config(
                "blocks and references need distinct collections".into(),
            ));
        }
        Ok(())
    }
}

/// Storage engine selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Volatile in-memory map.
    #[default]
    Memory,
    /// Append-only log file.
    Log {
        path: PathBuf,
        #[serde(default)]
        sync_mode: SyncMode,
    },
}

impl BackendConfig {
    /// Open the configured engine.
    pub fn open(&self) -> ServerResult<Arc<dyn Backend>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBackend::new())),
            Self::Log { path, sync_mode } => {
                let config = LogConfig { sync_mode: *sync_mode };
                Ok(Arc::new(LogBackend::open(path, config)?))
            }
        }
    }
}
