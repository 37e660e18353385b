pub mod chroma;
pub mod faiss;
pub mod milvus;
pub mod pinecone;
pub mod qdrant;
pub mod transport;
pub mod weaviate;

#[cfg(test)]
pub(crate) mod testing;

pub use chroma::ChromaStore;
pub use faiss::FaissStore;
pub use milvus::MilvusStore;
pub use pinecone::PineconeStore;
pub use qdrant::QdrantStore;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use weaviate::WeaviateStore;

use crate::models::ChunkMetadata;
use serde_json::Value;

/// Record ids come back as strings or integers depending on the backend.
pub(crate) fn id_string(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Unknown or partial metadata degrades to defaults.
pub(crate) fn metadata_from_value(value: Option<&Value>) -> ChunkMetadata {
    value
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Same as [`metadata_from_value`] for backends that keep metadata as a JSON string.
pub(crate) fn metadata_from_json_str(raw: Option<&str>) -> ChunkMetadata {
    raw.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}
