//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::QdrantIndex;
use std::path::PathBuf;
use tracing::info;

/// Write the default configuration and try to prepare the Qdrant collection.
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<()> {
    let base = base_dir.unwrap_or_else(Config::default_base_dir);
    let config_path = base.join("config.toml");

    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let mut config = Config::default();
    config.paths.base_dir = base.clone();
    config.paths.config_file = config_path.clone();
    config.save()?;
    info!("Created config at {:?}", config_path);

    // Collection creation is best-effort here; seed will retry it.
    match QdrantIndex::connect(&config).await {
        Ok(index) => match index.ensure_collection().await {
            Ok(()) => info!("Qdrant collection '{}' ready", config.index.collection_name),
            Err(e) => {
                tracing::warn!("Could not create Qdrant collection: {}. Run 'sqlsentry seed' once Qdrant is up.", e);
            }
        },
        Err(e) => {
            tracing::warn!(
                "Could not connect to Qdrant at {}: {}. Make sure Qdrant is running.",
                config.index.qdrant_url,
                e
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(Some(dir.path().to_path_buf()), false).await.unwrap();

        let config_path = dir.path().join("config.toml");
        assert!(config_path.exists());
        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.index.dimension, 1536);
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(Some(dir.path().to_path_buf()), false).await.unwrap();

        let err = cmd_init(Some(dir.path().to_path_buf()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));

        cmd_init(Some(dir.path().to_path_buf()), true).await.unwrap();
    }
}
