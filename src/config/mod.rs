//! Configuration management for sqlsentry
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reference-document index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Model-provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Analytics database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Reference-document index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Embedding dimension (feature-hash buckets)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Documents retrieved per question
    #[serde(default = "default_retrieval_k")]
    pub top_k: usize,
}

/// Model-provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible chat-completions API
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Environment variable name holding the API key
    #[serde(default = "default_provider_api_key_env")]
    pub api_key_env: String,

    /// Primary model identifier
    #[serde(default = "default_provider_model")]
    pub model: String,

    /// Fallback models, tried in order after the primary
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Request reasoning metadata alongside completions
    #[serde(default = "default_reasoning_enabled")]
    pub reasoning: bool,
}

/// Analytics database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pooled connections
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,

    /// Per-statement timeout in seconds
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Internal token expected from callers; empty means unconfigured
    #[serde(default = "default_internal_token")]
    pub internal_token: String,

    /// Conversation history capacity in messages
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Session-note capacity
    #[serde(default = "default_note_limit")]
    pub note_limit: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for sqlsentry data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            provider: ProviderConfig::default(),
            database: DatabaseConfig::default(),
            pipeline: PipelineConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            collection_name: default_collection_name(),
            dimension: default_embedding_dimension(),
            top_k: default_retrieval_k(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key_env: default_provider_api_key_env(),
            model: default_provider_model(),
            fallback_models: default_fallback_models(),
            timeout_secs: default_provider_timeout(),
            reasoning: default_reasoning_enabled(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_db_max_connections(),
            statement_timeout_secs: default_statement_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            internal_token: default_internal_token(),
            history_limit: default_history_limit(),
            note_limit: default_note_limit(),
        }
    }
}

impl Config {
    /// Get the default base directory for sqlsentry (~/.sqlsentry)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sqlsentry")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        if self.index.qdrant_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.index.qdrant_api_key_env).ok()
    }

    /// Get the provider API key from environment
    pub fn provider_api_key(&self) -> Option<String> {
        std::env::var(&self.provider.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.index.dimension == 0 {
            return Err(Error::Config("index.dimension must be positive".to_string()));
        }

        if self.index.top_k == 0 {
            return Err(Error::Config("index.top_k must be positive".to_string()));
        }

        if self.provider.timeout_secs == 0 {
            return Err(Error::Config(
                "provider.timeout_secs must be positive".to_string(),
            ));
        }

        if self.pipeline.history_limit == 0 {
            return Err(Error::Config(
                "pipeline.history_limit must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.index.collection_name, "sqlsentry_docs");
        assert_eq!(config.index.dimension, 1536);
        assert_eq!(config.index.top_k, 5);
        assert_eq!(config.pipeline.history_limit, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.index.collection_name = "test_collection".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.index.collection_name, "test_collection");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.index.dimension = 0;
        assert!(config.validate().is_err());

        config.index.dimension = 1536;
        assert!(config.validate().is_ok());

        config.index.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [provider]
            model = "openai/gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.provider.model, "openai/gpt-4o-mini");
        assert_eq!(parsed.index.dimension, 1536);
        assert_eq!(parsed.provider.timeout_secs, 45);
    }
}
