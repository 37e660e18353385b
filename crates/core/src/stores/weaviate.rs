use super::transport::{HttpTransport, ReqwestTransport};
use super::{metadata_from_json_str, str_at};
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

const BACKEND: &str = "weaviate";
const LIST_PAGE: usize = 100;

pub struct WeaviateStore {
    class_name: String,
    transport: Box<dyn HttpTransport>,
    embedder: Arc<dyn Embedder>,
}

/// Weaviate class names must start with an upper-case letter.
pub fn class_name_for(collection: &str) -> String {
    let mut chars = collection.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl WeaviateStore {
    pub fn connect(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        let mut transport = ReqwestTransport::new(&config.base_url("localhost", 8080), config.timeout())?;
        if let Some(key) = &config.api_key {
            transport = transport.with_header("Authorization", format!("Bearer {key}"));
        }
        Ok(Self::with_transport(config, Box::new(transport), embedder)?)
    }

    pub fn with_transport(
        config: &BackendConfig,
        transport: Box<dyn HttpTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            class_name: class_name_for(&config.collection_name),
            transport,
            embedder,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let path = format!("/v1/schema/{}", self.class_name);
        let response = self.transport.send(Method::GET, &path, None)?;
        if response.is_success() {
            return Ok(());
        }
        if !response.is_not_found() {
            response.into_success(BACKEND, "schema lookup")?;
        }
        self.create_schema()
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let class = json!({
            "class": self.class_name,
            "vectorizer": "none",
            "properties": [
                { "name": "text", "dataType": ["text"] },
                { "name": "source", "dataType": ["text"] },
                { "name": "metadata_json", "dataType": ["text"] },
            ],
        });
        self.transport
            .send(Method::POST, "/v1/schema", Some(&class))?
            .into_success(BACKEND, "create class")?;
        info!(class = %self.class_name, "created weaviate class");
        Ok(())
    }

    fn graphql_search(&self, vector: &[f32], limit: usize) -> Result<String, StoreError> {
        let vector = serde_json::to_string(vector)?;
        Ok(format!(
            "{{ Get {{ {class}(nearVector: {{vector: {vector}}}, limit: {limit}) \
             {{ text source metadata_json _additional {{ id certainty }} }} }} }}",
            class = self.class_name,
        ))
    }
}

fn object_to_chunk(object: &Value) -> StoredChunk {
    let metadata = metadata_from_json_str(object.pointer("/properties/metadata_json").and_then(Value::as_str));
    let source = object
        .pointer("/properties/source")
        .and_then(Value::as_str)
        .filter(|source| !source.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| metadata.source_or_unknown());
    StoredChunk {
        id: object.pointer("/id").and_then(Value::as_str).map(str::to_string),
        text: str_at(object, "/properties/text"),
        metadata,
        source,
    }
}

impl VectorBackend for WeaviateStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Weaviate
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let embeddings = self.embedder.embed_batch(chunks);
        let objects = chunks
            .iter()
            .zip(metadata)
            .zip(embeddings)
            .map(|((text, metadata), vector)| -> Result<Value, StoreError> {
                Ok(json!({
                    "class": self.class_name,
                    "id": Uuid::new_v4().to_string(),
                    "properties": {
                        "text": text,
                        "source": metadata.source,
                        "metadata_json": serde_json::to_string(metadata)?,
                    },
                    "vector": vector,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let parsed = self
            .transport
            .send(Method::POST, "/v1/batch/objects", Some(&json!({ "objects": objects })))?
            .into_success(BACKEND, "batch import")?;

        let failures = parsed
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| result.pointer("/result/errors/error"))
                    .filter_map(Value::as_array)
                    .flatten()
                    .filter_map(|error| error.pointer("/message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !failures.is_empty() {
            return Err(StoreError::backend(BACKEND, failures.join("; ")));
        }

        debug!(count = objects.len(), class = %self.class_name, "imported objects");
        Ok(objects.len())
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let graphql = self.graphql_search(&self.embedder.embed(query), limit)?;
        let parsed = self
            .transport
            .send(Method::POST, "/v1/graphql", Some(&json!({ "query": graphql })))?
            .into_success(BACKEND, "graphql search")?;

        if let Some(errors) = parsed.pointer("/errors").filter(|errors| !errors.is_null()) {
            return Err(StoreError::backend(BACKEND, errors.to_string()));
        }

        let pointer = format!("/data/Get/{}", self.class_name);
        let mut hits = parsed
            .pointer(&pointer)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let metadata = metadata_from_json_str(item.pointer("/metadata_json").and_then(Value::as_str));
                        let source = item
                            .pointer("/source")
                            .and_then(Value::as_str)
                            .filter(|source| !source.is_empty())
                            .map(str::to_string)
                            .unwrap_or_else(|| metadata.source_or_unknown());
                        SearchHit {
                            id: str_at(item, "/_additional/id"),
                            text: str_at(item, "/text"),
                            score: item
                                .pointer("/_additional/certainty")
                                .and_then(Value::as_f64)
                                .unwrap_or(0.0),
                            metadata,
                            source,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        sort_by_score_desc(&mut hits);
        Ok(hits)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut path = format!("/v1/objects?class={}&limit={LIST_PAGE}", self.class_name);
            if let Some(cursor) = &after {
                path.push_str(&format!("&after={cursor}"));
            }

            let parsed = self
                .transport
                .send(Method::GET, &path, None)?
                .into_success(BACKEND, "list objects")?;
            let objects = parsed
                .pointer("/objects")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            chunks.extend(objects.iter().map(object_to_chunk));
            after = objects
                .last()
                .and_then(|object| object.pointer("/id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if objects.len() < LIST_PAGE || after.is_none() {
                break;
            }
        }
        Ok(chunks)
    }

    /// Object ids are UUIDs; anything else cannot name an object.
    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let Ok(uuid) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let path = format!("/v1/objects/{}/{uuid}", self.class_name);
        let response = self.transport.send(Method::DELETE, &path, None)?;
        if response.is_not_found() {
            return Ok(false);
        }
        response.into_success(BACKEND, "delete object")?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        let path = format!("/v1/schema/{}", self.class_name);
        let response = self.transport.send(Method::DELETE, &path, None)?;
        if !response.is_not_found() {
            response.into_success(BACKEND, "delete class")?;
        }
        self.create_schema()
    }
}
