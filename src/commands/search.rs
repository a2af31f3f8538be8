//! Search command implementation

use crate::config::Config;
use crate::embed::hash_embedding;
use crate::index::{QdrantIndex, RetrievedDocument, VectorSearch};
use crate::error::Result;
use serde::Serialize;
use tracing::info;

/// Search result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub documents: Vec<RetrievedDocument>,
}

/// Search the reference-document index directly.
///
/// Unlike pipeline retrieval this propagates backend errors, since the whole
/// point of the command is inspecting the index.
pub async fn cmd_search(config: &Config, query: &str, limit: usize) -> Result<SearchResult> {
    let index = QdrantIndex::connect(config).await?;
    let vector = hash_embedding(query, config.index.dimension);
    let documents = index.search(vector, limit).await?;
    info!("Search returned {} documents", documents.len());

    Ok(SearchResult {
        query: query.to_string(),
        documents,
    })
}

pub fn print_search_results(result: &SearchResult) {
    if result.documents.is_empty() {
        println!("No documents found for '{}'", result.query);
        return;
    }

    println!("Found {} documents:\n", result.documents.len());
    for (idx, doc) in result.documents.iter().enumerate() {
        println!("{}. [{}] {}", idx + 1, doc.doc_type, doc.source);
        let preview: String = doc.content.chars().take(160).collect();
        if preview.len() < doc.content.len() {
            println!("   {}…", preview);
        } else {
            println!("   {}", preview);
        }
        println!();
    }
}
