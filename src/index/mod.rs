//! Reference-document index backed by Qdrant
//!
//! This module wraps the Qdrant client and provides:
//! - Collection management for the reference-document collection
//! - Idempotent document upsert
//! - Vector search behind the [`VectorSearch`] seam
//!
//! Retrieval is best-effort: the [`RetrievalClient`] converts any storage
//! failure into an empty result. Retrieval augments generation, it does not
//! gate it.

mod payload;

pub use payload::*;

use crate::config::Config;
use crate::embed::hash_embedding;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vector-search collaborator: rows ordered by ascending cosine distance.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Information about the reference-document collection
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub status: String,
}

/// Qdrant-backed document index
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.index.qdrant_url,
            &config.index.collection_name,
            config.index.dimension,
        )
        .await
    }

    /// Create a new index connection directly with URL and collection name
    pub async fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Get the expected vector dimension for this index
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Ensure the collection exists with cosine distance
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;

        if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await?;

        Ok(())
    }

    /// Get collection info (point count, status)
    pub async fn get_collection_info(&self) -> Result<Option<CollectionInfo>> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(None);
        }

        let info = self.client.collection_info(&self.collection).await?;
        Ok(info.result.map(|result| CollectionInfo {
            points_count: result.points_count.unwrap_or(0),
            status: format!("{:?}", result.status()),
        }))
    }

    /// Upsert reference documents, embedding each content body
    pub async fn upsert_documents(&self, docs: Vec<DocPayload>) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let points: Vec<DocPoint> = docs
            .into_iter()
            .map(|payload| DocPoint {
                id: payload.point_id(),
                vector: hash_embedding(&payload.content, self.dimension),
                payload,
            })
            .collect();

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        let count = points.len();
        let point_structs: Vec<_> = points.into_iter().map(|p| p.to_point_struct()).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, point_structs))
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl VectorSearch for QdrantIndex {
    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<RetrievedDocument>> {
        debug!(
            "Searching collection {} with limit {}",
            self.collection, k
        );

        let search_builder =
            SearchPointsBuilder::new(&self.collection, vector, k as u64).with_payload(true);

        let response = self.client.search_points(search_builder).await?;

        Ok(response.result.into_iter().map(scored_point_to_doc).collect())
    }
}

fn scored_point_to_doc(point: ScoredPoint) -> RetrievedDocument {
    let payload: DocPayload = point
        .payload
        .into_iter()
        .map(|(k, v)| (k, json_from_qdrant_value(v)))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    RetrievedDocument {
        id: point_id_to_string(point.id),
        doc_type: payload.doc_type,
        source: payload.source,
        content: payload.content,
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<qdrant_client::qdrant::PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;

    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

/// Best-effort retrieval over a [`VectorSearch`] backend.
///
/// Embeds the question with the deterministic feature hash and searches the
/// index; any backend failure degrades to an empty document list.
pub struct RetrievalClient {
    backend: Arc<dyn VectorSearch>,
    dimension: usize,
    top_k: usize,
}

impl RetrievalClient {
    pub fn new(backend: Arc<dyn VectorSearch>, dimension: usize, top_k: usize) -> Self {
        Self {
            backend,
            dimension,
            top_k,
        }
    }

    /// Embed a question into the index's vector space
    pub fn embed(&self, text: &str) -> Vec<f32> {
        hash_embedding(text, self.dimension)
    }

    /// Retrieve the top-k documents for a question, never failing
    pub async fn retrieve(&self, question: &str) -> Vec<RetrievedDocument> {
        let vector = self.embed(question);
        match self.backend.search(vector, self.top_k).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        }
    }
}
