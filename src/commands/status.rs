//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::index::QdrantIndex;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

/// Connectivity and readiness report
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub config_path: String,
    pub qdrant: QdrantStatus,
    pub database: DatabaseStatus,
    pub provider: ProviderStatus,
    pub internal_token_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantStatus {
    pub url: String,
    pub reachable: bool,
    pub collection: String,
    pub collection_exists: bool,
    pub points_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub reachable: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub base_url: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub api_key_configured: bool,
}

/// Probe every external dependency without mutating anything.
pub async fn cmd_status(config: &Config) -> Result<StatusReport> {
    let qdrant = match QdrantIndex::connect(config).await {
        Ok(index) => match index.get_collection_info().await {
            Ok(Some(info)) => QdrantStatus {
                url: config.index.qdrant_url.clone(),
                reachable: true,
                collection: config.index.collection_name.clone(),
                collection_exists: true,
                points_count: info.points_count,
            },
            Ok(None) => QdrantStatus {
                url: config.index.qdrant_url.clone(),
                reachable: true,
                collection: config.index.collection_name.clone(),
                collection_exists: false,
                points_count: 0,
            },
            Err(_) => unreachable_qdrant(config),
        },
        Err(_) => unreachable_qdrant(config),
    };

    let database = match PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => DatabaseStatus {
                reachable: true,
                error: None,
            },
            Err(e) => DatabaseStatus {
                reachable: false,
                error: Some(e.to_string()),
            },
        },
        Err(e) => DatabaseStatus {
            reachable: false,
            error: Some(e.to_string()),
        },
    };

    Ok(StatusReport {
        config_path: config.paths.config_file.display().to_string(),
        qdrant,
        database,
        provider: ProviderStatus {
            base_url: config.provider.base_url.clone(),
            model: config.provider.model.clone(),
            fallback_models: config.provider.fallback_models.clone(),
            api_key_configured: config.provider_api_key().is_some(),
        },
        internal_token_configured: !config.pipeline.internal_token.is_empty(),
    })
}

fn unreachable_qdrant(config: &Config) -> QdrantStatus {
    QdrantStatus {
        url: config.index.qdrant_url.clone(),
        reachable: false,
        collection: config.index.collection_name.clone(),
        collection_exists: false,
        points_count: 0,
    }
}

pub fn print_status(status: &StatusReport) {
    println!("sqlsentry status");
    println!("  Config: {}", status.config_path);

    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant.url);
    if status.qdrant.reachable {
        if status.qdrant.collection_exists {
            println!(
                "  Collection '{}': {} points",
                status.qdrant.collection, status.qdrant.points_count
            );
        } else {
            println!(
                "  Collection '{}' does not exist. Run 'sqlsentry seed --demo'.",
                status.qdrant.collection
            );
        }
    } else {
        println!("  Unreachable");
    }

    println!("\nDatabase:");
    if status.database.reachable {
        println!("  Reachable");
    } else {
        println!(
            "  Unreachable: {}",
            status.database.error.as_deref().unwrap_or("unknown error")
        );
    }

    println!("\nProvider:");
    println!("  Base URL: {}", status.provider.base_url);
    println!("  Model: {}", status.provider.model);
    if !status.provider.fallback_models.is_empty() {
        println!("  Fallbacks: {}", status.provider.fallback_models.join(", "));
    }
    println!(
        "  API key: {}",
        if status.provider.api_key_configured {
            "configured"
        } else {
            "missing"
        }
    );

    println!(
        "\nInternal token: {}",
        if status.internal_token_configured {
            "configured"
        } else {
            "missing"
        }
    );
}
