use super::transport::{HttpTransport, ReqwestTransport};
use super::{id_string, metadata_from_value, str_at};
use crate::config::{BackendConfig, BackendKind};
use crate::embeddings::{sparse_term_vector, Embedder};
use crate::error::{ConfigError, StoreError};
use crate::models::{sort_by_score_desc, ChunkMetadata, SearchHit, StoredChunk};
use crate::traits::VectorBackend;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "text";
const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    collection: String,
    transport: Box<dyn HttpTransport>,
    embedder: Arc<dyn Embedder>,
    use_sparse: bool,
}

impl QdrantStore {
    pub fn connect(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        if config.location.as_deref() == Some(":memory:") {
            return Err(ConfigError::InvalidValue {
                field: "location".to_string(),
                details: "in-process qdrant is not available, point at a server".to_string(),
            });
        }

        let mut transport = ReqwestTransport::new(&config.base_url("localhost", 6333), config.timeout())?;
        if let Some(key) = &config.api_key {
            transport = transport.with_header("api-key", key.as_str());
        }
        Ok(Self::with_transport(config, Box::new(transport), embedder)?)
    }

    /// Builds the adapter over any transport and makes sure the collection exists.
    pub fn with_transport(
        config: &BackendConfig,
        transport: Box<dyn HttpTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            collection: config.collection_name.clone(),
            transport,
            embedder,
            use_sparse: config.use_sparse,
        };
        store.ensure_collection()?;
        Ok(store)
    }

    fn collection_path(&self, suffix: &str) -> String {
        format!("/collections/{}{suffix}", self.collection)
    }

    fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.transport.send(Method::GET, &self.collection_path(""), None)?;
        if response.is_success() {
            return Ok(());
        }
        if !response.is_not_found() {
            response.into_success(BACKEND, "collection lookup")?;
        }
        self.create_collection()
    }

    fn create_collection(&self) -> Result<(), StoreError> {
        let dense = json!({
            "size": self.embedder.dimensions(),
            "distance": "Cosine",
        });
        let body = if self.use_sparse {
            json!({
                "vectors": { DENSE_VECTOR: dense },
                "sparse_vectors": { SPARSE_VECTOR: { "modifier": "idf" } },
            })
        } else {
            json!({ "vectors": dense })
        };

        self.transport
            .send(Method::PUT, &self.collection_path(""), Some(&body))?
            .into_success(BACKEND, "create collection")?;
        info!(collection = %self.collection, sparse = self.use_sparse, "created qdrant collection");
        Ok(())
    }

    fn point_vector(&self, text: &str, dense: Vec<f32>) -> Value {
        if self.use_sparse {
            let sparse = sparse_term_vector(text);
            json!({
                DENSE_VECTOR: dense,
                SPARSE_VECTOR: { "indices": sparse.indices, "values": sparse.values },
            })
        } else {
            json!(dense)
        }
    }

    fn search_body(&self, query: &str, limit: usize) -> (String, Value) {
        let dense = self.embedder.embed(query);
        if self.use_sparse {
            let sparse = sparse_term_vector(query);
            let body = json!({
                "prefetch": [
                    { "query": dense, "using": DENSE_VECTOR, "limit": limit * 2 },
                    {
                        "query": { "indices": sparse.indices, "values": sparse.values },
                        "using": SPARSE_VECTOR,
                        "limit": limit * 2,
                    },
                ],
                "query": { "fusion": "rrf" },
                "limit": limit,
                "with_payload": true,
            });
            (self.collection_path("/points/query"), body)
        } else {
            let body = json!({
                "vector": dense,
                "limit": limit,
                "with_payload": true,
            });
            (self.collection_path("/points/search"), body)
        }
    }
}

fn payload_metadata(point: &Value) -> ChunkMetadata {
    metadata_from_value(point.pointer("/payload/metadata"))
}

impl VectorBackend for QdrantStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Qdrant
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let embeddings = self.embedder.embed_batch(chunks);
        let points = chunks
            .iter()
            .zip(metadata)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": self.point_vector(text, embedding),
                    "payload": { "text": text, "metadata": metadata },
                })
            })
            .collect::<Vec<_>>();

        self.transport
            .send(
                Method::PUT,
                &self.collection_path("/points?wait=true"),
                Some(&json!({ "points": points })),
            )?
            .into_success(BACKEND, "upsert")?;
        debug!(count = points.len(), collection = %self.collection, "upserted points");
        Ok(points.len())
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let (path, body) = self.search_body(query, limit);
        let parsed = self
            .transport
            .send(Method::POST, &path, Some(&body))?
            .into_success(BACKEND, "search")?;

        // `points/search` answers with a bare list, `points/query` nests it.
        let hits = parsed
            .pointer("/result/points")
            .or_else(|| parsed.pointer("/result"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = hits
            .iter()
            .map(|hit| {
                let metadata = payload_metadata(hit);
                SearchHit {
                    id: hit.pointer("/id").map(id_string).unwrap_or_default(),
                    text: str_at(hit, "/payload/text"),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                    source: metadata.source_or_unknown(),
                    metadata,
                }
            })
            .collect::<Vec<_>>();
        sort_by_score_desc(&mut result);
        result.truncate(limit);
        Ok(result)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        let mut chunks = Vec::new();
        let mut offset = Value::Null;
        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let parsed = self
                .transport
                .send(Method::POST, &self.collection_path("/points/scroll"), Some(&body))?
                .into_success(BACKEND, "scroll")?;

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            chunks.extend(points.iter().map(|point| {
                let metadata = payload_metadata(point);
                StoredChunk {
                    id: point.pointer("/id").map(id_string),
                    text: str_at(point, "/payload/text"),
                    source: metadata.source_or_unknown(),
                    metadata,
                }
            }));

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                break;
            }
        }
        Ok(chunks)
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let point_id = match (Uuid::parse_str(id), id.parse::<u64>()) {
            (Ok(uuid), _) => json!(uuid.to_string()),
            (_, Ok(number)) => json!(number),
            _ => return Ok(false),
        };

        let lookup = self
            .transport
            .send(Method::GET, &self.collection_path(&format!("/points/{}", id_string(&point_id))), None)?;
        if lookup.is_not_found() {
            return Ok(false);
        }
        let found = lookup.into_success(BACKEND, "point lookup")?;
        if found.pointer("/result").map_or(true, Value::is_null) {
            return Ok(false);
        }

        self.transport
            .send(
                Method::POST,
                &self.collection_path("/points/delete?wait=true"),
                Some(&json!({ "points": [point_id] })),
            )?
            .into_success(BACKEND, "delete point")?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        let response = self.transport.send(Method::DELETE, &self.collection_path(""), None)?;
        if !response.is_not_found() {
            response.into_success(BACKEND, "drop collection")?;
        }
        self.create_collection()
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

    fn connect(config: &BackendConfig, transport: &ScriptedTransport) -> QdrantStore {
        QdrantStore::with_transport(config, transport.boxed(), embedder()).unwrap()
    }

    #[test]
    fn creates_missing_collection_with_cosine_distance() {
        let transport = ScriptedTransport::new();
        transport.reply(404, json!({})).reply(200, json!({"result": true}));
        connect(&BackendConfig::new("qdrant"), &transport);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "/collections/pdf_chunks");
        assert_eq!(requests[1].method, Method::PUT);
        let body = requests[1].body.clone().unwrap();
        assert_eq!(body["vectors"]["size"], 8);
        assert_eq!(body["vectors"]["distance"], "Cosine");
    }

    #[test]
    fn sparse_collection_declares_both_vectors() {
        let transport = ScriptedTransport::new();
        transport.reply(404, json!({})).reply(200, json!({"result": true}));
        let mut config = BackendConfig::new("qdrant");
        config.use_sparse = true;
        connect(&config, &transport);

        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["vectors"]["dense"]["size"], 8);
        assert_eq!(body["sparse_vectors"]["text"]["modifier"], "idf");
    }

    #[test]
    fn upsert_sends_one_point_per_chunk() {
        let transport = ScriptedTransport::new();
        transport.reply(200, json!({})).reply(200, json!({"status": "ok"}));
        let mut store = connect(&BackendConfig::new("qdrant"), &transport);

        let metadata = vec![ChunkMetadata::default(), ChunkMetadata::default()];
        let written = store
            .insert(&["one".to_string(), "two".to_string()], &metadata)
            .unwrap();
        assert_eq!(written, 2);

        let request = transport.last_request().unwrap();
        assert_eq!(request.path, "/collections/pdf_chunks/points?wait=true");
        let points = request.body.unwrap()["points"].as_array().cloned().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1]["payload"]["text"], "two");
        assert_eq!(points[0]["vector"].as_array().map(Vec::len), Some(8));
    }

    #[test]
    fn search_parses_hits_in_score_order() {
        let transport = ScriptedTransport::new();
        transport.reply(200, json!({})).reply(
            200,
            json!({"result": [
                {"id": "b", "score": 0.4, "payload": {"text": "second", "metadata": {"source": "b.pdf"}}},
                {"id": 7, "score": 0.9, "payload": {"text": "first", "metadata": {"source": "a.pdf", "chunk_index": 2}}}
            ]}),
        );
        let store = connect(&BackendConfig::new("qdrant"), &transport);

        let hits = store.query("pump", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "7");
        assert_eq!(hits[0].source, "a.pdf");
        assert_eq!(hits[0].metadata.chunk_index, 2);
        assert_eq!(transport.last_request().unwrap().path, "/collections/pdf_chunks/points/search");
    }

    #[test]
    fn sparse_search_fuses_with_rrf() {
        let transport = ScriptedTransport::new();
        transport
            .reply(200, json!({}))
            .reply(200, json!({"result": {"points": [{"id": "x", "score": 0.5, "payload": {"text": "hit"}}]}}));
        let mut config = BackendConfig::new("qdrant");
        config.use_sparse = true;
        let store = connect(&config, &transport);

        let hits = store.query("pump valve", 3).unwrap();
        assert_eq!(hits[0].text, "hit");
        assert_eq!(hits[0].source, "unknown");

        let request = transport.last_request().unwrap();
        assert_eq!(request.path, "/collections/pdf_chunks/points/query");
        let body = request.body.unwrap();
        assert_eq!(body["query"]["fusion"], "rrf");
        assert_eq!(body["prefetch"][1]["using"], "text");
    }

    #[test]
    fn scroll_follows_next_page_offset() {
        let transport = ScriptedTransport::new();
        transport
            .reply(200, json!({}))
            .reply(200, json!({"result": {"points": [{"id": "a", "payload": {"text": "one"}}], "next_page_offset": "b"}}))
            .reply(200, json!({"result": {"points": [{"id": "b", "payload": {"text": "two"}}], "next_page_offset": null}}));
        let store = connect(&BackendConfig::new("qdrant"), &transport);

        let chunks = store.list().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].id.as_deref(), Some("b"));
        assert_eq!(transport.last_request().unwrap().body.unwrap()["offset"], "b");
    }

    #[test]
    fn delete_reports_missing_points() {
        let transport = ScriptedTransport::new();
        transport.reply(200, json!({})).reply(404, json!({}));
        let mut store = connect(&BackendConfig::new("qdrant"), &transport);

        let id = Uuid::new_v4().to_string();
        assert!(!store.remove(&id).unwrap());
        assert!(!store.remove("not-a-point-id").unwrap());
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn delete_existing_point() {
        let transport = ScriptedTransport::new();
        let id = Uuid::new_v4().to_string();
        transport
            .reply(200, json!({}))
            .reply(200, json!({"result": {"id": id}}))
            .reply(200, json!({"status": "ok"}));
        let mut store = connect(&BackendConfig::new("qdrant"), &transport);

        assert!(store.remove(&id).unwrap());
        let body = transport.last_request().unwrap().body.unwrap();
        assert_eq!(body["points"][0], json!(id));
    }

    #[test]
    fn memory_location_is_rejected() {
        let mut config = BackendConfig::new("qdrant");
        config.location = Some(":memory:".to_string());
        assert!(matches!(
            QdrantStore::connect(&config, embedder()),
            Err(ConfigError::InvalidValue { field, .. }) if field == "location"
        ));
    }
}
