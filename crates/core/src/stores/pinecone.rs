//! Pinecone serverless index. Index management goes to the controller,
//! record traffic to the per-index data host it reports.

use super::transport::{HttpTransport, ReqwestTransport};
use super::str_at;
use crate::config::{env_value, BackendConfig, BackendKind};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, StoreError};
use crate::models::{sort_by_score_desc, ChunkKind, ChunkMetadata, SearchHit, StoredChunk};
use crate::traits::VectorBackend;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::form_urlencoded;
use uuid::Uuid;

const BACKEND: &str = "pinecone";
const CONTROLLER_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_CLOUD: &str = "aws";
const READY_ATTEMPTS: usize = 60;

pub struct PineconeStore {
    index_name: String,
    data: Box<dyn HttpTransport>,
    embedder: Arc<dyn Embedder>,
}

fn api_key(config: &BackendConfig) -> Result<String, ConfigError> {
    config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .or_else(|| env_value("PINECONE_API_KEY"))
        .ok_or_else(|| ConfigError::MissingCredential {
            backend: BACKEND.to_string(),
            field: "api_key".to_string(),
        })
}

fn authorized(base: &str, key: &str, config: &BackendConfig) -> Result<ReqwestTransport, StoreError> {
    Ok(ReqwestTransport::new(base, config.timeout())?
        .with_header("Api-Key", key)
        .with_header("X-Pinecone-API-Version", API_VERSION))
}

impl PineconeStore {
    pub fn connect(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        let key = api_key(config)?;
        let controller_url = config.url.as_deref().unwrap_or(CONTROLLER_URL);
        let control = authorized(controller_url, &key, config)?;

        let index_name = index_name(config);
        let host = ensure_index(&control, &index_name, config, embedder.dimensions())?;
        let data_url = if host.starts_with("http") {
            host
        } else {
            format!("https://{host}")
        };
        let data = authorized(&data_url, &key, config)?;
        Ok(Self {
            index_name,
            data: Box::new(data),
            embedder,
        })
    }

    /// Same as [`PineconeStore::connect`] with caller-supplied transports.
    pub fn with_transports(
        config: &BackendConfig,
        control: &dyn HttpTransport,
        data: Box<dyn HttpTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        api_key(config)?;
        let index_name = index_name(config);
        ensure_index(control, &index_name, config, embedder.dimensions())?;
        Ok(Self {
            index_name,
            data,
            embedder,
        })
    }

    fn post(&self, path: &str, body: Value, operation: &str) -> Result<Value, StoreError> {
        self.data
            .send(Method::POST, path, Some(&body))?
            .into_success(BACKEND, operation)
    }
}

fn index_name(config: &BackendConfig) -> String {
    config
        .index_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| config.collection_name.clone())
}

/// Creates the index when absent and waits until it reports ready. Returns the data host.
fn ensure_index(
    control: &dyn HttpTransport,
    name: &str,
    config: &BackendConfig,
    dimension: usize,
) -> Result<String, StoreError> {
    let listed = control
        .send(Method::GET, "/indexes", None)?
        .into_success(BACKEND, "list indexes")?;
    let exists = listed
        .pointer("/indexes")
        .and_then(Value::as_array)
        .is_some_and(|indexes| indexes.iter().any(|index| str_at(index, "/name") == name));

    if !exists {
        let body = json!({
            "name": name,
            "dimension": dimension,
            "metric": "cosine",
            "spec": {
                "serverless": {
                    "cloud": config.cloud.as_deref().unwrap_or(DEFAULT_CLOUD),
                    "region": config.environment.as_deref().unwrap_or(DEFAULT_REGION),
                }
            },
        });
        control
            .send(Method::POST, "/indexes", Some(&body))?
            .into_success(BACKEND, "create index")?;
        info!(index = name, dimension, "created pinecone index");
    }

    for attempt in 0..READY_ATTEMPTS {
        let described = control
            .send(Method::GET, &format!("/indexes/{name}"), None)?
            .into_success(BACKEND, "describe index")?;
        let host = str_at(&described, "/host");
        let ready = described
            .pointer("/status/ready")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if ready && !host.is_empty() {
            return Ok(host);
        }
        debug!(index = name, attempt, "waiting for pinecone index");
        thread::sleep(Duration::from_secs(1));
    }
    Err(StoreError::backend(BACKEND, format!("index {name} never became ready")))
}

fn flat_metadata(text: &str, metadata: &ChunkMetadata) -> Value {
    json!({
        "text": text,
        "source": metadata.source,
        "chunk_index": metadata.chunk_index,
        "total_chunks": metadata.total_chunks,
        "file_path": metadata.file_path,
        "chunk_type": metadata.chunk_type,
    })
}

/// Pinecone returns numeric metadata as floats, so fields are read one by one.
fn parse_flat_metadata(value: Option<&Value>) -> (String, ChunkMetadata) {
    let Some(value) = value else {
        return (String::new(), ChunkMetadata::default());
    };
    let count = |field: &str| {
        value
            .get(field)
            .and_then(|number| number.as_u64().or_else(|| number.as_f64().map(|float| float as u64)))
            .unwrap_or_default()
    };
    let chunk_type = match value.get("chunk_type").and_then(Value::as_str) {
        Some("table") => ChunkKind::Table,
        _ => ChunkKind::Text,
    };
    let metadata = ChunkMetadata {
        source: str_at(value, "/source"),
        chunk_index: count("chunk_index"),
        total_chunks: count("total_chunks"),
        file_path: str_at(value, "/file_path"),
        chunk_type,
    };
    (str_at(value, "/text"), metadata)
}

impl VectorBackend for PineconeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Pinecone
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let embeddings = self.embedder.embed_batch(chunks);
        let vectors = chunks
            .iter()
            .zip(metadata)
            .zip(embeddings)
            .map(|((text, metadata), values)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "values": values,
                    "metadata": flat_metadata(text, metadata),
                })
            })
            .collect::<Vec<_>>();

        let parsed = self.post("/vectors/upsert", json!({ "vectors": vectors }), "upsert")?;
        let upserted = parsed
            .pointer("/upsertedCount")
            .and_then(Value::as_u64)
            .map_or(vectors.len(), |count| count as usize);
        debug!(count = upserted, index = %self.index_name, "upserted vectors");
        Ok(upserted)
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let parsed = self.post(
            "/query",
            json!({
                "vector": self.embedder.embed(query),
                "topK": limit,
                "includeMetadata": true,
            }),
            "query",
        )?;

        let mut hits = parsed
            .pointer("/matches")
            .and_then(Value::as_array)
            .map(|matches| {
                matches
                    .iter()
                    .map(|hit| {
                        let (text, metadata) = parse_flat_metadata(hit.get("metadata"));
                        SearchHit {
                            id: str_at(hit, "/id"),
                            text,
                            score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                            source: metadata.source_or_unknown(),
                            metadata,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        sort_by_score_desc(&mut hits);
        Ok(hits)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        warn!(index = %self.index_name, "pinecone cannot enumerate records, returning none");
        Ok(Vec::new())
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("ids", id)
            .finish();
        let fetched = self
            .data
            .send(Method::GET, &format!("/vectors/fetch?{query}"), None)?
            .into_success(BACKEND, "fetch")?;
        let exists = fetched
            .pointer("/vectors")
            .and_then(Value::as_object)
            .is_some_and(|vectors| vectors.contains_key(id));
        if !exists {
            return Ok(false);
        }
        self.post("/vectors/delete", json!({ "ids": [id] }), "delete")?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        let response = self
            .data
            .send(Method::POST, "/vectors/delete", Some(&json!({ "deleteAll": true })))?;
        // An index with no records answers deleteAll with 404.
        if !response.is_not_found() {
            response.into_success(BACKEND, "delete all")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::testing::ScriptedTransport;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder::new("test", 8))
    }

    fn config() -> BackendConfig {
        let mut config = BackendConfig::new("pinecone");
        config.api_key = Some("secret".to_string());
        config
    }

    fn connect(data: &ScriptedTransport) -> PineconeStore {
        let control = ScriptedTransport::new();
        control
            .reply(200, json!({"indexes": [{"name": "pdf_chunks"}]}))
            .reply(200, json!({"host": "pdf-chunks.svc.pinecone.io", "status": {"ready": true}}));
        PineconeStore::with_transports(&config(), &control, data.boxed(), embedder()).unwrap()
    }

    #[test]
    fn missing_index_is_created_serverless() {
        let control = ScriptedTransport::new();
        control
            .reply(200, json!({"indexes": []}))
            .reply(201, json!({}))
            .reply(200, json!({"host": "h", "status": {"ready": true}}));
        let mut config = config();
        config.environment = Some("eu-west-1".to_string());
        config.index_name = Some("manuals".to_string());
        PineconeStore::with_transports(&config, &control, ScriptedTransport::new().boxed(), embedder()).unwrap();

        let requests = control.requests();
        let body = requests[1].body.clone().unwrap();
        assert_eq!(body["name"], "manuals");
        assert_eq!(body["dimension"], 8);
        assert_eq!(body["metric"], "cosine");
        assert_eq!(body["spec"]["serverless"]["region"], "eu-west-1");
        assert_eq!(body["spec"]["serverless"]["cloud"], "aws");
        assert_eq!(requests[2].path, "/indexes/manuals");
    }

    #[test]
    fn upsert_flattens_metadata() {
        let data = ScriptedTransport::new();
        let mut store = connect(&data);
        data.reply(200, json!({"upsertedCount": 1}));

        let metadata = ChunkMetadata {
            source: "a.pdf".to_string(),
            chunk_index: 2,
            total_chunks: 5,
            file_path: "/docs/a.pdf".to_string(),
            chunk_type: ChunkKind::Table,
        };
        assert_eq!(store.insert(&["|a|b|".to_string()], &[metadata]).unwrap(), 1);

        let body = data.last_request().unwrap().body.unwrap();
        let stored = &body["vectors"][0]["metadata"];
        assert_eq!(stored["text"], "|a|b|");
        assert_eq!(stored["chunk_type"], "table");
        assert_eq!(stored["total_chunks"], 5);
    }

    #[test]
    fn query_reads_float_metadata() {
        let data = ScriptedTransport::new();
        let store = connect(&data);
        data.reply(
            200,
            json!({"matches": [
                {"id": "v1", "score": 0.2, "metadata": {"text": "low", "source": "a.pdf", "chunk_index": 1.0}},
                {"id": "v2", "score": 0.8, "metadata": {"text": "high", "chunk_index": 3.0, "chunk_type": "table"}}
            ]}),
        );

        let hits = store.query("pump", 2).unwrap();
        assert_eq!(hits[0].id, "v2");
        assert_eq!(hits[0].metadata.chunk_index, 3);
        assert_eq!(hits[0].metadata.chunk_type, ChunkKind::Table);
        assert_eq!(hits[0].source, "unknown");
        assert_eq!(hits[1].text, "low");
        assert_eq!(data.last_request().unwrap().body.unwrap()["topK"], 2);
    }

    #[test]
    fn listing_is_unsupported_but_not_an_error() {
        let data = ScriptedTransport::new();
        let store = connect(&data);
        assert!(store.list().unwrap().is_empty());
        assert!(data.requests().is_empty());
    }

    #[test]
    fn delete_fetches_before_deleting() {
        let data = ScriptedTransport::new();
        let mut store = connect(&data);
        data.reply(200, json!({"vectors": {}}));
        assert!(!store.remove("ghost").unwrap());

        data.reply(200, json!({"vectors": {"v1": {"id": "v1"}}}))
            .reply(200, json!({}));
        assert!(store.remove("v1").unwrap());
        assert_eq!(data.last_request().unwrap().body.unwrap()["ids"][0], "v1");
    }

    #[test]
    fn fetch_query_encodes_the_id() {
        let data = ScriptedTransport::new();
        let mut store = connect(&data);
        data.reply(200, json!({"vectors": {}}));

        assert!(!store.remove("a&b c#d").unwrap());
        assert_eq!(data.last_request().unwrap().path, "/vectors/fetch?ids=a%26b+c%23d");
    }

    #[test]
    fn clear_deletes_everything() {
        let data = ScriptedTransport::new();
        let mut store = connect(&data);
        data.reply(404, json!({})).reply(200, json!({}));
        store.reset().unwrap();
        store.reset().unwrap();
        assert_eq!(data.last_request().unwrap().body.unwrap()["deleteAll"], true);
    }
}
