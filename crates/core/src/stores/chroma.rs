use super::transport::{HttpTransport, ReqwestTransport};
use super::{id_string, metadata_from_value};
use crate::config::{BackendConfig, BackendKind};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, StoreError};
use crate::models::{sort_by_score_desc, ChunkMetadata, SearchHit, StoredChunk};
use crate::traits::VectorBackend;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "chroma";

/// Chroma server over its v1 REST API. The collection id is resolved once at
/// construction and again whenever the collection is recreated.
pub struct ChromaStore {
    name: String,
    collection_id: String,
    transport: Box<dyn HttpTransport>,
    embedder: Arc<dyn Embedder>,
}

impl ChromaStore {
    pub fn connect(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(&config.base_url("localhost", 8000), config.timeout())?;
        Ok(Self::with_transport(config, Box::new(transport), embedder)?)
    }

    pub fn with_transport(
        config: &BackendConfig,
        transport: Box<dyn HttpTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let mut store = Self {
            name: config.collection_name.clone(),
            collection_id: String::new(),
            transport,
            embedder,
        };
        store.collection_id = store.get_or_create()?;
        Ok(store)
    }

    fn get_or_create(&self) -> Result<String, StoreError> {
        let body = json!({
            "name": self.name,
            "get_or_create": true,
            "metadata": { "hnsw:space": "cosine" },
        });
        let parsed = self
            .transport
            .send(Method::POST, "/api/v1/collections", Some(&body))?
            .into_success(BACKEND, "get_or_create collection")?;

        match parsed.pointer("/id").and_then(Value::as_str) {
            Some(id) => {
                info!(collection = %self.name, id, "chroma collection ready");
                Ok(id.to_string())
            }
            None => Err(StoreError::backend(BACKEND, "collection response has no id")),
        }
    }

    fn call(&self, action: &str, body: Value) -> Result<Value, StoreError> {
        let path = format!("/api/v1/collections/{}/{action}", self.collection_id);
        self.transport
            .send(Method::POST, &path, Some(&body))?
            .into_success(BACKEND, action)
    }
}

fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

impl VectorBackend for ChromaStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Chroma
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let ids = chunks
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect::<Vec<_>>();
        self.call(
            "add",
            json!({
                "ids": ids,
                "embeddings": self.embedder.embed_batch(chunks),
                "documents": chunks,
                "metadatas": metadata,
            }),
        )?;
        debug!(count = ids.len(), collection = %self.name, "added documents");
        Ok(ids.len())
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let parsed = self.call(
            "query",
            json!({
                "query_embeddings": [self.embedder.embed(query)],
                "n_results": limit,
                "include": ["documents", "metadatas", "distances"],
            }),
        )?;

        let ids = array_at(&parsed, "/ids/0");
        let documents = array_at(&parsed, "/documents/0");
        let metadatas = array_at(&parsed, "/metadatas/0");
        let distances = array_at(&parsed, "/distances/0");

        let mut hits = ids
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let metadata = metadata_from_value(metadatas.get(row));
                let distance = distances.get(row).and_then(Value::as_f64).unwrap_or(1.0);
                SearchHit {
                    id: id_string(id),
                    text: documents
                        .get(row)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    score: 1.0 - distance,
                    source: metadata.source_or_unknown(),
                    metadata,
                }
            })
            .collect::<Vec<_>>();
        sort_by_score_desc(&mut hits);
        Ok(hits)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let parsed = self.call("get", json!({ "include": ["documents", "metadatas"] }))?;
        let documents = array_at(&parsed, "/documents");
        let metadatas = array_at(&parsed, "/metadatas");

        Ok(array_at(&parsed, "/ids")
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let metadata = metadata_from_value(metadatas.get(row));
                StoredChunk {
                    id: Some(id_string(id)),
                    text: documents
                        .get(row)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source: metadata.source_or_unknown(),
                    metadata,
                }
            })
            .collect())
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let existing = self.call("get", json!({ "ids": [id], "include": [] }))?;
        if array_at(&existing, "/ids").is_empty() {
            return Ok(false);
        }
        self.call("delete", json!({ "ids": [id] }))?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        let path = format!("/api/v1/collections/{}", self.name);
        let response = self.transport.send(Method::DELETE, &path, None)?;
        if !response.is_not_found() {
            response.into_success(BACKEND, "delete collection")?;
        }
        self.collection_id = self.get_or_create()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::testing::ScriptedTransport;

    fn connect(transport: &ScriptedTransport) -> ChromaStore {
        transport.reply(200, json!({"id": "c-1", "name": "pdf_chunks"}));
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new("test", 8));
        ChromaStore::with_transport(&BackendConfig::new("chroma"), transport.boxed(), embedder).unwrap()
    }

    #[test]
    fn construction_requests_cosine_collection() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        assert_eq!(store.collection_id, "c-1");

        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["get_or_create"], true);
        assert_eq!(body["metadata"]["hnsw:space"], "cosine");
    }

    #[test]
    fn add_sends_parallel_arrays() {
        let transport = ScriptedTransport::new();
        let mut store = connect(&transport);
        transport.reply(201, json!(true));

        let metadata = vec![ChunkMetadata {
            source: "a.pdf".to_string(),
            ..ChunkMetadata::default()
        }];
        assert_eq!(store.insert(&["alpha".to_string()], &metadata).unwrap(), 1);

        let request = transport.last_request().unwrap();
        assert_eq!(request.path, "/api/v1/collections/c-1/add");
        let body = request.body.unwrap();
        assert_eq!(body["documents"][0], "alpha");
        assert_eq!(body["metadatas"][0]["source"], "a.pdf");
        assert_eq!(body["metadatas"][0]["chunk_type"], "text");
        assert_eq!(body["embeddings"][0].as_array().map(Vec::len), Some(8));
    }

    #[test]
    fn query_converts_distance_to_similarity() {
        let transport = ScriptedTransport::new();
        let store = connect(&transport);
        transport.reply(
            200,
            json!({
                "ids": [["x", "y"]],
                "documents": [["far", "near"]],
                "metadatas": [[{"source": "x.pdf"}, {"source": "y.pdf"}]],
                "distances": [[0.75, 0.25]]
            }),
        );

        let hits = store.query("near", 2).unwrap();
        assert_eq!(hits[0].id, "y");
        assert!((hits[0].score - 0.75).abs() < 1e-9);
        assert_eq!(hits[1].source, "x.pdf");
    }

    #[test]
    fn delete_checks_existence_first() {
        let transport = ScriptedTransport::new();
        let mut store = connect(&transport);
        transport.reply(200, json!({"ids": []}));
        assert!(!store.remove("ghost").unwrap());

        transport.reply(200, json!({"ids": ["real"]})).reply(200, json!(null));
        assert!(store.remove("real").unwrap());
        assert_eq!(transport.last_request().unwrap().path, "/api/v1/collections/c-1/delete");
    }

    #[test]
    fn clear_recreates_collection_with_new_id() {
        let transport = ScriptedTransport::new();
        let mut store = connect(&transport);
        transport
            .reply(200, json!(null))
            .reply(200, json!({"id": "c-2"}));

        store.reset().unwrap();
        assert_eq!(store.collection_id, "c-2");
        let requests = transport.requests();
        assert_eq!(requests[1].method, Method::DELETE);
        assert_eq!(requests[1].path, "/api/v1/collections/pdf_chunks");
    }
}
