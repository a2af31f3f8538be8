//! Payload schema for reference-document points

use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A reference document retrieved for a question, ordered by similarity rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Point id in the index
    pub id: String,

    /// Document kind ("schema", "knowledge", "widget_policy")
    pub doc_type: String,

    /// Human-readable origin of the document
    pub source: String,

    /// Document body
    pub content: String,
}

/// A document ready to be upserted into the index
#[derive(Debug, Clone)]
pub struct DocPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: DocPayload,
}

impl DocPoint {
    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let payload_map = self.payload.to_qdrant_payload();
        PointStruct::new(self.id.to_string(), self.vector, payload_map)
    }
}

/// Payload stored with each reference document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocPayload {
    pub doc_type: String,
    pub source: String,
    pub content: String,
}

impl DocPayload {
    pub fn new(doc_type: String, source: String, content: String) -> Self {
        Self {
            doc_type,
            source,
            content,
        }
    }

    /// Deterministic point id derived from source + content, so re-seeding
    /// the same document set is idempotent.
    pub fn point_id(&self) -> Uuid {
        let key = format!("{}\n{}", self.source, self.content);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
    }

    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();
        map.insert("doc_type".to_string(), string_to_qdrant(&self.doc_type));
        map.insert("source".to_string(), string_to_qdrant(&self.source));
        map.insert("content".to_string(), string_to_qdrant(&self.content));
        map
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

impl From<Map<String, Value>> for DocPayload {
    fn from(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map)).unwrap_or_else(|_| DocPayload {
            doc_type: String::new(),
            source: String::new(),
            content: String::new(),
        })
    }
}
