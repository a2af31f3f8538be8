//! Seed command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{DocPayload, QdrantIndex};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Seeding result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct SeedStats {
    pub documents_upserted: usize,
    pub collection: String,
}

/// Ensure the collection exists and upsert reference documents from a JSON
/// file or the built-in demo set. Point ids are deterministic, so re-seeding
/// the same documents is idempotent.
pub async fn cmd_seed(
    config: &Config,
    file: Option<&Path>,
    demo: bool,
) -> Result<SeedStats> {
    let docs = match (file, demo) {
        (Some(path), _) => load_documents(path)?,
        (None, true) => demo_documents(),
        (None, false) => {
            return Err(Error::Config(
                "Nothing to seed: pass --file <docs.json> or --demo.".to_string(),
            ))
        }
    };

    let index = QdrantIndex::connect(config).await?;
    index.ensure_collection().await?;

    let bar = ProgressBar::new(docs.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("seeding documents");

    // Upsert in small batches so the bar reflects actual progress.
    let mut upserted = 0;
    for batch in docs.chunks(16) {
        upserted += index.upsert_documents(batch.to_vec()).await?;
        bar.inc(batch.len() as u64);
    }
    bar.finish_and_clear();

    info!(
        "Seeded {} documents into '{}'",
        upserted, config.index.collection_name
    );

    Ok(SeedStats {
        documents_upserted: upserted,
        collection: config.index.collection_name.clone(),
    })
}

fn load_documents(path: &Path) -> Result<Vec<DocPayload>> {
    let content = std::fs::read_to_string(path)?;
    let docs: Vec<DocPayload> = serde_json::from_str(&content)?;
    if docs.is_empty() {
        return Err(Error::Config(format!(
            "No documents found in {}",
            path.display()
        )));
    }
    Ok(docs)
}

/// Built-in reference documents for the pagila demo schema.
pub fn demo_documents() -> Vec<DocPayload> {
    let entries: &[(&str, &str, &str)] = &[
        (
            "schema",
            "v_payment_scoped.md",
            "View v_payment_scoped(payment_id, customer_id, staff_id, rental_id, amount, \
             payment_date, store_id). Row-level scoped payments. Revenue questions use \
             SUM(amount); per-customer revenue groups by customer_id.",
        ),
        (
            "schema",
            "v_rental_scoped.md",
            "View v_rental_scoped(rental_id, rental_date, inventory_id, customer_id, \
             return_date, staff_id, store_id). Row-level scoped rentals. Rental counts \
             group by customer_id or store_id.",
        ),
        (
            "schema",
            "v_customer_masked.md",
            "View v_customer_masked(customer_id, first_name_masked, last_name_masked, \
             email_masked, store_id, active). Customer names and emails are masked; raw \
             first_name/last_name columns do not exist on this view.",
        ),
        (
            "knowledge",
            "revenue_definitions.md",
            "Revenue means SUM(amount) from payments. 'Top customers' ranks customers by \
             total payment amount descending. Time windows filter on payment_date.",
        ),
        (
            "knowledge",
            "join_hints.md",
            "Rental activity by customer name joins v_rental_scoped to v_customer_masked \
             on customer_id and groups by the masked name columns.",
        ),
        (
            "widget_policy",
            "widget_policy.md",
            "Chart policy: line charts for trends over time, bar charts for rankings and \
             comparisons, pie charts for shares and distributions.",
        ),
    ];

    entries
        .iter()
        .map(|(doc_type, source, content)| DocPayload {
            doc_type: doc_type.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        })
        .collect()
}

pub fn print_seed_stats(stats: &SeedStats) {
    println!("✓ Seeding complete");
    println!("  Collection: {}", stats.collection);
    println!("  Documents upserted: {}", stats.documents_upserted);
}
