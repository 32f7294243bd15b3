//! Configuration management for the server.

use crate::backend::Seed;
use attrsync_engine::SyncConfig;
use std::env;
use std::path::{Path, PathBuf};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// JSON file holding the pair configuration
    pub sync_config: Option<PathBuf>,
    /// JSON file seeding the in-memory backend
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            sync_config: None,
            seed_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let sync_config = env::var("SYNC_CONFIG").ok().map(PathBuf::from);
        let seed_file = env::var("SEED_FILE").ok().map(PathBuf::from);

        Ok(Self {
            host,
            port,
            sync_config,
            seed_file,
        })
    }

    /// Read the pair configuration; without a file the engine stays disabled.
    pub fn load_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let Some(path) = &self.sync_config else {
            tracing::warn!("SYNC_CONFIG not set, no pairs configured");
            return Ok(SyncConfig::default());
        };
        let json = read(path)?;
        Ok(SyncConfig::from_json(&json)?)
    }

    /// Read the backend seed, empty when no file is configured.
    pub fn load_seed(&self) -> Result<Seed, ConfigError> {
        let Some(path) = &self.seed_file else {
            return Ok(Seed::default());
        };
        let json = read(path)?;
        serde_json::from_str(&json).map_err(|source| ConfigError::InvalidSeed {
            path: path.clone(),
            source,
        })
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid seed file {path}: {source}")]
    InvalidSeed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid sync configuration: {0}")]
    Sync(#[from] attrsync_engine::ConfigError),
}
